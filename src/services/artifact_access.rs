//! Read and soft-delete access to finished artifacts.

use crate::{
    models::Artifact,
    services::{
        blob::{BlobError, ByteStream},
        error::{UploadError, UploadResult},
        session_manager::UploadService,
    },
};
use tracing::{info, instrument, warn};

impl UploadService {
    /// Open the active artifact stored under `object_key` for streaming.
    #[instrument(skip(self))]
    pub async fn open_artifact(&self, object_key: &str) -> UploadResult<(Artifact, ByteStream)> {
        let artifact = self
            .artifacts()
            .find_by_key(object_key)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("object `{}` not found", object_key)))?;
        let body = match self.blobs.open_for_read(&artifact.object_key).await {
            Ok(body) => body,
            Err(BlobError::NotFound(location)) => {
                warn!(object_id = artifact.id, %location, "indexed object has no stored bytes");
                return Err(UploadError::not_found(format!("object `{}` not found", object_key)));
            }
            Err(err) => return Err(err.into()),
        };
        Ok((artifact, body))
    }

    /// Mark an artifact deleted and release its bytes.
    ///
    /// Once deleted the hash no longer short-circuits new sessions. Sessions
    /// that already reference the artifact keep their recorded URL.
    #[instrument(skip(self))]
    pub async fn delete_artifact(&self, id: i64) -> UploadResult<Artifact> {
        let artifact = self
            .artifacts()
            .soft_delete(id)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("object {} not found", id)))?;

        if let Err(err) = self.blobs.delete(&artifact.object_key).await {
            warn!(object_id = id, object_key = %artifact.object_key, error = %err, "failed to remove deleted object bytes");
        }
        info!(object_id = id, etag = %artifact.etag, "object deleted");
        Ok(artifact)
    }
}
