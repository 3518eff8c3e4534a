//! Session lifecycle and chunk acceptance.
//!
//! Session and slot state lives in SQLite (`SessionStore`), payloads go through
//! a `BlobStore`, and finished files are indexed by content hash (`DedupIndex`).
//! Merging is delegated to the `Assembler`.

use crate::{
    models::{
        ChunkSlot, SessionStatus, SlotStatus, UploadSession,
        session::{chunk_count, plan_chunks},
    },
    services::{
        assembler::{Assembler, CompletedUpload},
        blob::{BlobError, BlobReceipt, BlobStore, ByteStream},
        dedup_index::DedupIndex,
        error::{UploadError, UploadResult},
        progress,
        session_store::SessionStore,
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound on chunks per session.
pub const MAX_CHUNK_COUNT: i64 = 10_000;

/// 50 MiB.
pub const DEFAULT_MAX_CHUNK_BYTES: i64 = 50 * 1024 * 1024;

/// Object names are `<uploadId>_<fileName>`, a single path component that
/// must fit the common 255-byte filesystem limit after the 37-byte prefix.
const MAX_FILE_NAME_LEN: usize = 255 - 37;

/// Knobs that shape artifact naming and session limits.
#[derive(Clone, Debug)]
pub struct UploadSettings {
    /// Logical bucket recorded on every artifact.
    pub bucket: String,

    /// Prefix joined with the object key to form an artifact's access URL.
    pub public_url_prefix: String,

    pub max_chunk_count: i64,

    /// Largest chunk a session may declare; chunk bodies share this limit.
    pub max_chunk_bytes: i64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            bucket: "default".into(),
            public_url_prefix: "/files".into(),
            max_chunk_count: MAX_CHUNK_COUNT,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// Parameters of a new upload session.
#[derive(Clone, Debug, Default)]
pub struct NewSession {
    pub file_name: String,
    pub file_size: i64,
    pub chunk_size: i64,
    pub file_type: String,
    /// Client-declared MD5 of the whole file, enabling instant upload.
    pub content_hash: Option<String>,
    pub user_id: Option<i64>,
    pub business_id: Option<String>,
}

/// Artifact reused by an instant upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstantUpload {
    pub url: String,
    pub object_key: String,
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct SessionCreated {
    pub upload_id: String,
    pub chunk_count: i64,
    /// Set when the session completed immediately from the dedup index.
    pub instant: Option<InstantUpload>,
}

/// Body of one chunk upload.
pub struct ChunkPayload {
    pub data: ByteStream,
    /// Byte count the client announced, if it announced one.
    pub declared_size: Option<i64>,
    /// Lowercase hex MD5 the client expects the chunk to have.
    pub expected_md5: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkAccepted {
    pub chunk_index: i64,
    pub progress: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkState {
    pub chunk_index: i64,
    pub status: SlotStatus,
}

/// Read-only snapshot used by clients to resume.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub upload_id: String,
    pub status: SessionStatus,
    pub progress: i64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    pub chunks: Vec<ChunkState>,
}

/// Blob store scope holding a session's chunk payloads.
pub(crate) fn chunk_scope(upload_id: &str) -> String {
    format!("chunks/{}", upload_id)
}

#[derive(Clone)]
pub struct UploadService {
    /// Shared SQLite pool, also used by readiness checks.
    pub db: Arc<SqlitePool>,
    pub blobs: Arc<dyn BlobStore>,
    sessions: SessionStore,
    artifacts: DedupIndex,
    assembler: Assembler,
    settings: UploadSettings,
}

impl UploadService {
    pub fn new(db: Arc<SqlitePool>, blobs: Arc<dyn BlobStore>, settings: UploadSettings) -> Self {
        let sessions = SessionStore::new(db.clone());
        let artifacts = DedupIndex::new(db.clone());
        let assembler = Assembler::new(
            sessions.clone(),
            artifacts.clone(),
            blobs.clone(),
            settings.clone(),
        );
        Self {
            db,
            blobs,
            sessions,
            artifacts,
            assembler,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    pub fn artifacts(&self) -> &DedupIndex {
        &self.artifacts
    }

    /// Create a session, or complete it on the spot when the declared content
    /// hash is already stored.
    #[instrument(skip(self, request), fields(file_name = %request.file_name, file_size = request.file_size))]
    pub async fn create_session(&self, request: NewSession) -> UploadResult<SessionCreated> {
        ensure_file_name_safe(&request.file_name)?;
        if request.file_size <= 0 {
            return Err(UploadError::invalid("file_size must be greater than zero"));
        }
        if request.chunk_size <= 0 {
            return Err(UploadError::invalid("chunk_size must be greater than zero"));
        }
        let content_hash = normalize_md5(request.content_hash.as_deref())?;

        let upload_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut session = UploadSession {
            upload_id: upload_id.clone(),
            file_name: request.file_name,
            file_size: request.file_size,
            file_type: request.file_type,
            chunk_size: request.chunk_size,
            chunk_count: 0,
            status: SessionStatus::Uploading,
            uploaded_chunks: 0,
            progress: 0,
            object_key: None,
            url: None,
            etag: None,
            artifact_id: None,
            user_id: request.user_id,
            business_id: request.business_id,
            created_at: now,
            updated_at: now,
        };

        if let Some(hash) = content_hash.as_deref() {
            if let Some(existing) = self.artifacts.lookup(hash).await? {
                session.status = SessionStatus::Completed;
                session.progress = progress::percentage(0, 0);
                session.object_key = Some(existing.object_key.clone());
                session.url = Some(existing.url.clone());
                session.etag = Some(existing.etag.clone());
                session.artifact_id = Some(existing.id);
                self.sessions.create(&session, &[]).await?;

                info!(%upload_id, etag = %existing.etag, "instant upload from existing artifact");
                return Ok(SessionCreated {
                    upload_id,
                    chunk_count: 0,
                    instant: Some(InstantUpload {
                        url: existing.url,
                        object_key: existing.object_key,
                        etag: existing.etag,
                    }),
                });
            }
        }

        if session.chunk_size > self.settings.max_chunk_bytes {
            return Err(UploadError::invalid(format!(
                "chunk_size {} exceeds the limit of {} bytes",
                session.chunk_size, self.settings.max_chunk_bytes
            )));
        }
        let count = chunk_count(session.file_size, session.chunk_size);
        if count > self.settings.max_chunk_count {
            return Err(UploadError::invalid(format!(
                "too many chunks: {} (max {}); use a larger chunk_size",
                count, self.settings.max_chunk_count
            )));
        }
        session.chunk_count = count;
        let slot_sizes = plan_chunks(session.file_size, session.chunk_size);
        self.sessions.create(&session, &slot_sizes).await?;

        info!(%upload_id, chunk_count = count, "upload session created");
        Ok(SessionCreated {
            upload_id,
            chunk_count: count,
            instant: None,
        })
    }

    /// Store one chunk and recompute the session's progress.
    #[instrument(skip(self, payload), fields(declared_size = ?payload.declared_size))]
    pub async fn accept_chunk(
        &self,
        upload_id: &str,
        chunk_index: i64,
        payload: ChunkPayload,
    ) -> UploadResult<ChunkAccepted> {
        let session = self.load_session(upload_id).await?;
        if chunk_index < 0 || chunk_index >= session.chunk_count {
            return Err(UploadError::invalid(format!(
                "invalid chunk index {} (session has {} chunks)",
                chunk_index, session.chunk_count
            )));
        }
        if session.status.is_terminal() {
            return Err(UploadError::conflict(format!(
                "upload session is {}, not uploading",
                session.status.as_str()
            )));
        }
        let slot = self
            .sessions
            .get_slot(upload_id, chunk_index)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("chunk {} not found", chunk_index)))?;
        if slot.status == SlotStatus::Uploaded {
            return Err(UploadError::conflict(format!(
                "chunk {} already uploaded",
                chunk_index
            )));
        }
        if let Some(declared) = payload.declared_size {
            if declared != slot.expected_size {
                return Err(size_mismatch(slot.expected_size, declared));
            }
        }

        let receipt = match self.write_chunk(&slot, payload.data).await {
            Ok(receipt) => receipt,
            Err(BlobError::SizeMismatch { expected, actual }) => {
                return Err(size_mismatch(expected as i64, actual as i64));
            }
            Err(err) => {
                if let Err(mark_err) = self.sessions.mark_slot_failed(upload_id, chunk_index).await
                {
                    warn!(%upload_id, chunk_index, error = %mark_err, "failed to flag chunk slot as failed");
                }
                return Err(err.into());
            }
        };

        if let Some(expected) = payload.expected_md5.as_deref() {
            if expected != receipt.md5 {
                self.discard_blob(&receipt.location).await;
                return Err(UploadError::invalid(format!(
                    "chunk checksum mismatch. expected: {}, got: {}",
                    expected, receipt.md5
                )));
            }
        }

        let committed = match self
            .sessions
            .mark_slot_uploaded(upload_id, chunk_index, &receipt.location, &receipt.md5)
            .await
        {
            Ok(committed) => committed,
            Err(err) => {
                self.discard_blob(&receipt.location).await;
                return Err(err.into());
            }
        };
        if !committed {
            self.discard_blob(&receipt.location).await;
            return Err(UploadError::conflict(format!(
                "chunk {} already uploaded",
                chunk_index
            )));
        }

        let progress = self.refresh_progress(&session).await?;
        debug!(%upload_id, chunk_index, progress, "chunk accepted");
        Ok(ChunkAccepted {
            chunk_index,
            progress,
        })
    }

    /// Merge all chunks into the final artifact. See [`Assembler::complete`].
    pub async fn complete(&self, upload_id: &str) -> UploadResult<CompletedUpload> {
        self.assembler.complete(upload_id).await
    }

    /// Snapshot of a session and its per-chunk state, ordered by index.
    #[instrument(skip(self))]
    pub async fn status(&self, upload_id: &str) -> UploadResult<SessionReport> {
        let session = self.load_session(upload_id).await?;
        let slots = self.sessions.list_slots(upload_id).await?;

        let (uploaded_chunks, progress) = if session.status == SessionStatus::Uploading {
            let uploaded = count_uploaded(&slots);
            (uploaded, progress::percentage(uploaded, session.chunk_count))
        } else {
            (session.uploaded_chunks, session.progress)
        };

        Ok(SessionReport {
            upload_id: session.upload_id,
            status: session.status,
            progress,
            uploaded_chunks,
            total_chunks: session.chunk_count,
            chunks: slots
                .into_iter()
                .map(|slot| ChunkState {
                    chunk_index: slot.chunk_index,
                    status: slot.status,
                })
                .collect(),
        })
    }

    async fn load_session(&self, upload_id: &str) -> UploadResult<UploadSession> {
        self.sessions
            .get_session(upload_id)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("upload session `{}` not found", upload_id)))
    }

    async fn write_chunk(
        &self,
        slot: &ChunkSlot,
        data: ByteStream,
    ) -> Result<BlobReceipt, BlobError> {
        let name = format!("chunk_{}.{}", slot.chunk_index, Uuid::new_v4().simple());
        self.blobs
            .put(
                &chunk_scope(&slot.upload_id),
                &name,
                data,
                slot.expected_size as u64,
            )
            .await
    }

    /// Recount uploaded slots and persist the derived progress.
    async fn refresh_progress(&self, session: &UploadSession) -> UploadResult<i64> {
        let uploaded = self.sessions.count_uploaded(&session.upload_id).await?;
        let progress = progress::percentage(uploaded, session.chunk_count);
        if let Err(err) = self
            .sessions
            .record_progress(&session.upload_id, uploaded, progress)
            .await
        {
            warn!(upload_id = %session.upload_id, error = %err, "failed to record upload progress");
        }
        Ok(progress)
    }

    /// Best-effort removal of a blob that no committed slot refers to.
    async fn discard_blob(&self, location: &str) {
        if let Err(err) = self.blobs.delete(location).await {
            warn!(%location, error = %err, "failed to discard orphaned blob");
        }
    }
}

fn count_uploaded(slots: &[ChunkSlot]) -> i64 {
    slots
        .iter()
        .filter(|slot| slot.status == SlotStatus::Uploaded)
        .count() as i64
}

fn size_mismatch(expected: i64, got: i64) -> UploadError {
    UploadError::invalid(format!(
        "chunk size mismatch. expected: {}, got: {}",
        expected, got
    ))
}

/// File names become part of an object key, so they must be a single safe
/// path component.
fn ensure_file_name_safe(name: &str) -> UploadResult<()> {
    if name.trim().is_empty() {
        return Err(UploadError::invalid("file_name is required"));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(UploadError::invalid("file_name is too long"));
    }
    if name.starts_with('.')
        || name
            .chars()
            .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return Err(UploadError::invalid(format!(
            "file_name `{}` contains disallowed characters",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// Accept a hex MD5 in any case; blank means "not supplied".
fn normalize_md5(raw: Option<&str>) -> UploadResult<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if raw.len() != 32 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UploadError::invalid("file hash must be a 32-character hex MD5"));
    }
    Ok(Some(raw.to_ascii_lowercase()))
}
