use crate::services::blob::BlobError;
use thiserror::Error;

/// Failure taxonomy of the upload engine.
///
/// `InvalidArgument`, `NotFound` and `Conflict` carry a client-facing message.
/// Everything else is an internal failure whose detail is only logged.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("{0}")]
    Internal(String),
}

impl UploadError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
