//! Merges a session's chunks into one artifact.
//!
//! Chunks are streamed in ascending index order straight into a single blob
//! store write. The store hashes the bytes as it writes them, so the artifact's
//! etag is the MD5 of the reconstructed file without a second pass. Memory use
//! is bounded by the store's read buffer, not by the file size.

use crate::{
    models::{Artifact, ChunkSlot, NewArtifact, SessionStatus, SlotStatus, UploadSession},
    services::{
        blob::{BlobReceipt, BlobStore, ByteStream},
        dedup_index::DedupIndex,
        error::{UploadError, UploadResult},
        locks::SessionLocks,
        session_manager::{UploadSettings, chunk_scope},
        session_store::SessionStore,
    },
};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Result of a successful (or already finished) completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedUpload {
    pub status: SessionStatus,
    pub file_url: String,
    pub file_size: i64,
    pub file_name: String,
    pub object_key: String,
    pub etag: String,
    pub object_id: i64,
}

#[derive(Clone)]
pub struct Assembler {
    sessions: SessionStore,
    artifacts: DedupIndex,
    blobs: Arc<dyn BlobStore>,
    locks: SessionLocks,
    settings: UploadSettings,
}

impl Assembler {
    pub fn new(
        sessions: SessionStore,
        artifacts: DedupIndex,
        blobs: Arc<dyn BlobStore>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            sessions,
            artifacts,
            blobs,
            locks: SessionLocks::new(),
            settings,
        }
    }

    /// Merge every uploaded chunk of `upload_id` into its final artifact.
    ///
    /// Idempotent: a completed session returns its recorded artifact without
    /// touching storage. At most one merge per session runs at a time. On any
    /// storage failure the session stays `uploading` with its chunks intact so
    /// the caller can retry.
    #[instrument(skip(self))]
    pub async fn complete(&self, upload_id: &str) -> UploadResult<CompletedUpload> {
        let session = self.load(upload_id).await?;
        if session.status == SessionStatus::Completed {
            return completed_view(&session);
        }

        let _guard = self.locks.acquire(upload_id).await;

        // Another caller may have finished while we waited.
        let session = self.load(upload_id).await?;
        match session.status {
            SessionStatus::Completed => return completed_view(&session),
            SessionStatus::Uploading => {}
            other => {
                return Err(UploadError::invalid(format!(
                    "upload session is {}, not uploading",
                    other.as_str()
                )));
            }
        }

        let slots = self.sessions.list_slots(upload_id).await?;
        let uploaded = slots
            .iter()
            .filter(|slot| slot.status == SlotStatus::Uploaded)
            .count() as i64;
        if uploaded != session.chunk_count {
            return Err(UploadError::invalid(format!(
                "not all chunks uploaded. expected: {}, uploaded: {}",
                session.chunk_count, uploaded
            )));
        }
        let sources = merge_sources(&slots)?;

        info!(%upload_id, chunks = sources.len(), file_size = session.file_size, "merging chunks");
        let receipt = self.merge(&session, sources.clone()).await?;

        let artifact = match self.register(&session, &receipt).await {
            Ok(artifact) => artifact,
            Err(err) => {
                self.discard(&receipt.location).await;
                return Err(err);
            }
        };

        if !self.sessions.complete(upload_id, &artifact).await? {
            // Unreachable while the session lock is held.
            return Err(UploadError::conflict("upload session is no longer uploading"));
        }

        self.release_chunks(upload_id, &sources).await;

        info!(%upload_id, etag = %artifact.etag, object_id = artifact.id, "upload completed");
        Ok(CompletedUpload {
            status: SessionStatus::Completed,
            file_url: artifact.url,
            file_size: session.file_size,
            file_name: session.file_name,
            object_key: artifact.object_key,
            etag: artifact.etag,
            object_id: artifact.id,
        })
    }

    async fn load(&self, upload_id: &str) -> UploadResult<UploadSession> {
        self.sessions.get_session(upload_id).await?.ok_or_else(|| {
            UploadError::not_found(format!("upload session `{}` not found", upload_id))
        })
    }

    /// Stream `sources` in order into the artifact's destination.
    ///
    /// The destination is only published if every byte arrived; a failed merge
    /// leaves nothing reachable.
    async fn merge(
        &self,
        session: &UploadSession,
        sources: Vec<String>,
    ) -> UploadResult<BlobReceipt> {
        let reader = self.blobs.clone();
        let merged: ByteStream = Box::pin(
            stream::iter(sources)
                .then(move |location| {
                    let reader = reader.clone();
                    async move { reader.open_for_read(&location).await }
                })
                .try_flatten(),
        );

        let scope = format!("objects/{}", Utc::now().format("%Y/%m/%d"));
        let name = format!("{}_{}", session.upload_id, session.file_name);
        self.blobs
            .put(&scope, &name, merged, session.file_size as u64)
            .await
            .map_err(|err| {
                error!(upload_id = %session.upload_id, error = %err, "merge failed");
                UploadError::from(err)
            })
    }

    /// Record the merged blob in the dedup index. If an artifact with the same
    /// hash already exists it wins, and our copy of the bytes is dropped.
    async fn register(
        &self,
        session: &UploadSession,
        receipt: &BlobReceipt,
    ) -> UploadResult<Artifact> {
        let mime_type = if session.file_type.trim().is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            session.file_type.clone()
        };
        let new = NewArtifact {
            file_name: session.file_name.clone(),
            file_size: session.file_size,
            file_type: session.file_type.clone(),
            mime_type,
            bucket: self.settings.bucket.clone(),
            object_key: receipt.location.clone(),
            etag: receipt.md5.clone(),
            url: public_url(&self.settings.public_url_prefix, &receipt.location),
            user_id: session.user_id,
            business_id: session.business_id.clone(),
        };

        let registration = self.artifacts.register(&new).await?;
        if !registration.created && registration.artifact.object_key != receipt.location {
            info!(
                upload_id = %session.upload_id,
                etag = %receipt.md5,
                "content already stored; reusing existing artifact"
            );
            self.discard(&receipt.location).await;
        }
        Ok(registration.artifact)
    }

    /// Drop chunk payloads once the session is durably completed.
    async fn release_chunks(&self, upload_id: &str, sources: &[String]) {
        for location in sources {
            if let Err(err) = self.blobs.delete(location).await {
                warn!(%upload_id, %location, error = %err, "failed to delete merged chunk");
            }
        }
        if let Err(err) = self.blobs.delete_scope(&chunk_scope(upload_id)).await {
            warn!(%upload_id, error = %err, "failed to release chunk area");
        }
    }

    async fn discard(&self, location: &str) {
        if let Err(err) = self.blobs.delete(location).await {
            warn!(%location, error = %err, "failed to discard merged blob");
        }
    }
}

/// Storage locations of `slots` in index order, checking the slot set is the
/// contiguous range `0..len` with every payload present.
fn merge_sources(slots: &[ChunkSlot]) -> UploadResult<Vec<String>> {
    slots
        .iter()
        .enumerate()
        .map(|(position, slot)| {
            if slot.chunk_index != position as i64 {
                return Err(UploadError::Internal(format!(
                    "chunk slots are not contiguous at index {}",
                    position
                )));
            }
            slot.storage_location.clone().ok_or_else(|| {
                UploadError::Internal(format!(
                    "uploaded chunk {} has no storage location",
                    slot.chunk_index
                ))
            })
        })
        .collect()
}

fn completed_view(session: &UploadSession) -> UploadResult<CompletedUpload> {
    match (
        &session.url,
        &session.object_key,
        &session.etag,
        session.artifact_id,
    ) {
        (Some(url), Some(object_key), Some(etag), Some(object_id)) => Ok(CompletedUpload {
            status: SessionStatus::Completed,
            file_url: url.clone(),
            file_size: session.file_size,
            file_name: session.file_name.clone(),
            object_key: object_key.clone(),
            etag: etag.clone(),
            object_id,
        }),
        _ => Err(UploadError::Internal(format!(
            "completed session `{}` is missing its artifact",
            session.upload_id
        ))),
    }
}

pub(crate) fn public_url(prefix: &str, object_key: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), object_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: i64, location: Option<&str>) -> ChunkSlot {
        ChunkSlot {
            upload_id: "u".into(),
            chunk_index: index,
            expected_size: 1,
            status: SlotStatus::Uploaded,
            storage_location: location.map(str::to_string),
            checksum: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sources_follow_index_order() {
        let slots = vec![slot(0, Some("c/0")), slot(1, Some("c/1")), slot(2, Some("c/2"))];
        assert_eq!(merge_sources(&slots).unwrap(), vec!["c/0", "c/1", "c/2"]);
    }

    #[test]
    fn gaps_and_missing_locations_are_internal_errors() {
        let gap = vec![slot(0, Some("c/0")), slot(2, Some("c/2"))];
        assert!(matches!(merge_sources(&gap), Err(UploadError::Internal(_))));

        let missing = vec![slot(0, None)];
        assert!(matches!(merge_sources(&missing), Err(UploadError::Internal(_))));
    }

    #[test]
    fn url_joins_prefix_and_key() {
        assert_eq!(public_url("/files/", "objects/a_b.txt"), "/files/objects/a_b.txt");
        assert_eq!(
            public_url("https://cdn.example.com", "objects/x"),
            "https://cdn.example.com/objects/x"
        );
    }
}
