//! Content-hash index of finished artifacts.
//!
//! Uniqueness of the hash among active artifacts is enforced by a partial
//! unique index; registration races resolve to whichever row landed first.

use crate::models::{Artifact, ArtifactStatus, NewArtifact};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

const ARTIFACT_COLUMNS: &str = "id, file_name, file_size, file_type, mime_type, bucket, \
     object_key, etag, url, user_id, business_id, status, created_at, updated_at";

/// Outcome of [`DedupIndex::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub artifact: Artifact,

    /// `false` when an active artifact with the same hash already existed and
    /// was returned instead.
    pub created: bool,
}

#[derive(Clone)]
pub struct DedupIndex {
    db: Arc<SqlitePool>,
}

impl DedupIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Find the active artifact whose content hash is `etag`.
    pub async fn lookup(&self, etag: &str) -> Result<Option<Artifact>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE etag = ? AND status = ?"
        ))
        .bind(etag)
        .bind(ArtifactStatus::Active)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Artifact>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Find the active artifact stored under `object_key`.
    pub async fn find_by_key(&self, object_key: &str) -> Result<Option<Artifact>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE object_key = ? AND status = ?"
        ))
        .bind(object_key)
        .bind(ArtifactStatus::Active)
        .fetch_optional(&*self.db)
        .await
    }

    /// Insert `new` unless an active artifact with the same hash exists, in
    /// which case that record is returned untouched.
    pub async fn register(&self, new: &NewArtifact) -> Result<Registration, sqlx::Error> {
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Artifact>(&format!(
            "INSERT INTO artifacts (
                file_name, file_size, file_type, mime_type, bucket, object_key, etag, url,
                user_id, business_id, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING {ARTIFACT_COLUMNS}"
        ))
        .bind(&new.file_name)
        .bind(new.file_size)
        .bind(&new.file_type)
        .bind(&new.mime_type)
        .bind(&new.bucket)
        .bind(&new.object_key)
        .bind(&new.etag)
        .bind(&new.url)
        .bind(new.user_id)
        .bind(&new.business_id)
        .bind(ArtifactStatus::Active)
        .bind(now)
        .bind(now)
        .fetch_optional(&*self.db)
        .await?;

        if let Some(artifact) = inserted {
            return Ok(Registration {
                artifact,
                created: true,
            });
        }

        match self.lookup(&new.etag).await? {
            Some(artifact) => Ok(Registration {
                artifact,
                created: false,
            }),
            // The insert lost on `object_key` rather than on the hash.
            None => Err(sqlx::Error::RowNotFound),
        }
    }

    /// Mark an active artifact deleted. Returns the updated record, or `None`
    /// if no active artifact has that id.
    pub async fn soft_delete(&self, id: i64) -> Result<Option<Artifact>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(&format!(
            "UPDATE artifacts SET status = ?, updated_at = ?
             WHERE id = ? AND status = ?
             RETURNING {ARTIFACT_COLUMNS}"
        ))
        .bind(ArtifactStatus::Deleted)
        .bind(Utc::now())
        .bind(id)
        .bind(ArtifactStatus::Active)
        .fetch_optional(&*self.db)
        .await
    }
}
