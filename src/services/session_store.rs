//! Durable records of upload sessions and their chunk slots (SQLite).
//!
//! This is the source of truth for session and slot status. Every slot
//! transition is a single conditional `UPDATE` keyed by `(upload_id, chunk_index)`.

use crate::models::{Artifact, ChunkSlot, SessionStatus, SlotStatus, UploadSession};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

const SESSION_COLUMNS: &str = "upload_id, file_name, file_size, file_type, chunk_size, \
     chunk_count, status, uploaded_chunks, progress, object_key, url, etag, artifact_id, \
     user_id, business_id, created_at, updated_at";

const SLOT_COLUMNS: &str =
    "upload_id, chunk_index, expected_size, status, storage_location, checksum, updated_at";

/// SQLite keeps at most 32766 bind parameters per statement; 4 per slot row.
const SLOT_INSERT_BATCH: usize = 500;

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<SqlitePool>,
}

impl SessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Persist a session together with one pending slot per entry of `slot_sizes`.
    ///
    /// Runs in one transaction: either the session and its full slot set exist
    /// afterwards, or nothing does.
    pub async fn create(
        &self,
        session: &UploadSession,
        slot_sizes: &[i64],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO upload_sessions (
                upload_id, file_name, file_size, file_type, chunk_size, chunk_count,
                status, uploaded_chunks, progress, object_key, url, etag, artifact_id,
                user_id, business_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.upload_id)
        .bind(&session.file_name)
        .bind(session.file_size)
        .bind(&session.file_type)
        .bind(session.chunk_size)
        .bind(session.chunk_count)
        .bind(session.status)
        .bind(session.uploaded_chunks)
        .bind(session.progress)
        .bind(&session.object_key)
        .bind(&session.url)
        .bind(&session.etag)
        .bind(session.artifact_id)
        .bind(session.user_id)
        .bind(&session.business_id)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;

        let indexed: Vec<(i64, i64)> = slot_sizes
            .iter()
            .enumerate()
            .map(|(index, size)| (index as i64, *size))
            .collect();
        for batch in indexed.chunks(SLOT_INSERT_BATCH) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO chunk_slots (upload_id, chunk_index, expected_size, status, updated_at) ",
            );
            builder.push_values(batch, |mut row, (index, size)| {
                row.push_bind(&session.upload_id)
                    .push_bind(*index)
                    .push_bind(*size)
                    .push_bind(SlotStatus::Pending)
                    .push_bind(session.created_at);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }

    pub async fn get_session(&self, upload_id: &str) -> Result<Option<UploadSession>, sqlx::Error> {
        sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE upload_id = ?"
        ))
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn get_slot(
        &self,
        upload_id: &str,
        chunk_index: i64,
    ) -> Result<Option<ChunkSlot>, sqlx::Error> {
        sqlx::query_as::<_, ChunkSlot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM chunk_slots WHERE upload_id = ? AND chunk_index = ?"
        ))
        .bind(upload_id)
        .bind(chunk_index)
        .fetch_optional(&*self.db)
        .await
    }

    /// All slots of a session in ascending index order.
    pub async fn list_slots(&self, upload_id: &str) -> Result<Vec<ChunkSlot>, sqlx::Error> {
        sqlx::query_as::<_, ChunkSlot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM chunk_slots WHERE upload_id = ? ORDER BY chunk_index ASC"
        ))
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Authoritative count of slots in state `uploaded`.
    pub async fn count_uploaded(&self, upload_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunk_slots WHERE upload_id = ? AND status = ?",
        )
        .bind(upload_id)
        .bind(SlotStatus::Uploaded)
        .fetch_one(&*self.db)
        .await
    }

    /// Compare-and-set a slot from pending/failed to uploaded.
    ///
    /// Returns `false` when the slot was not in a uploadable state, i.e. another
    /// writer already won.
    pub async fn mark_slot_uploaded(
        &self,
        upload_id: &str,
        chunk_index: i64,
        location: &str,
        checksum: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chunk_slots
             SET status = ?, storage_location = ?, checksum = ?, updated_at = ?
             WHERE upload_id = ? AND chunk_index = ? AND status IN (?, ?)",
        )
        .bind(SlotStatus::Uploaded)
        .bind(location)
        .bind(checksum)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(chunk_index)
        .bind(SlotStatus::Pending)
        .bind(SlotStatus::Failed)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flag a pending slot whose payload could not be stored.
    pub async fn mark_slot_failed(
        &self,
        upload_id: &str,
        chunk_index: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chunk_slots SET status = ?, updated_at = ?
             WHERE upload_id = ? AND chunk_index = ? AND status = ?",
        )
        .bind(SlotStatus::Failed)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(chunk_index)
        .bind(SlotStatus::Pending)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Store a recomputed progress snapshot.
    ///
    /// Never moves the counter backwards and never touches a terminal session,
    /// so a late writer carrying a stale count cannot clobber a newer one.
    pub async fn record_progress(
        &self,
        upload_id: &str,
        uploaded_chunks: i64,
        progress: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE upload_sessions
             SET uploaded_chunks = ?, progress = ?, updated_at = ?
             WHERE upload_id = ? AND status = ? AND uploaded_chunks <= ?",
        )
        .bind(uploaded_chunks)
        .bind(progress)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(SessionStatus::Uploading)
        .bind(uploaded_chunks)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Transition an uploading session to completed, recording the artifact,
    /// and drop its slot records.
    ///
    /// Returns `false` if the session was no longer uploading.
    pub async fn complete(&self, upload_id: &str, artifact: &Artifact) -> Result<bool, sqlx::Error> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            "UPDATE upload_sessions
             SET status = ?, uploaded_chunks = chunk_count, progress = 100,
                 object_key = ?, url = ?, etag = ?, artifact_id = ?, updated_at = ?
             WHERE upload_id = ? AND status = ?",
        )
        .bind(SessionStatus::Completed)
        .bind(&artifact.object_key)
        .bind(&artifact.url)
        .bind(&artifact.etag)
        .bind(artifact.id)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(SessionStatus::Uploading)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM chunk_slots WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}
