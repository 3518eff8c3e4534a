//! Blob store abstraction for chunk payloads and merged artifacts.
//!
//! Locations are slash-separated relative keys (`chunks/<uploadId>/chunk_3.<uuid>`,
//! `objects/2026/10/19/<uploadId>_movie.mp4`). A scope is a key prefix that groups
//! related blobs so they can be released together.

mod filesystem;
mod memory;

pub use filesystem::FilesystemBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// A boxed stream of bytes flowing into or out of the store.
pub type ByteStream = Pin<Box<dyn Stream<Item = BlobResult<Bytes>> + Send>>;

const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// What a successful `put` committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobReceipt {
    /// Location to pass to `open_for_read` / `delete`.
    pub location: String,

    /// Number of bytes written; always equals the requested `expected_size`.
    pub size: u64,

    /// Lowercase hex MD5 of the committed bytes, computed during the write.
    pub md5: String,
}

/// Durable byte storage.
///
/// Writes are atomic with respect to readers: a blob is either absent or fully
/// written. A `put` whose stream does not yield exactly `expected_size` bytes
/// fails with [`BlobError::SizeMismatch`] and publishes nothing.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stream `data` into `scope/name` and publish it atomically.
    async fn put(
        &self,
        scope: &str,
        name: &str,
        data: ByteStream,
        expected_size: u64,
    ) -> BlobResult<BlobReceipt>;

    /// Open a published blob for streaming reads.
    async fn open_for_read(&self, location: &str) -> BlobResult<ByteStream>;

    /// Remove a single blob. Missing blobs report `NotFound`.
    async fn delete(&self, location: &str) -> BlobResult<()>;

    /// Remove every blob under `scope`. Missing scopes are not an error.
    async fn delete_scope(&self, scope: &str) -> BlobResult<()>;
}

/// Join a scope and a leaf name into a location.
pub fn join_key(scope: &str, name: &str) -> String {
    let scope = scope.trim_end_matches('/');
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", scope, name)
    }
}

/// Reject keys that could escape the store root or collide with temp files.
///
/// Rejects empty or overlong keys, absolute keys, backslashes, control bytes,
/// and any component that is empty, `.`, `..`, or starts with a dot.
pub fn ensure_key_safe(key: &str) -> BlobResult<()> {
    let invalid = || BlobError::InvalidKey(key.to_string());
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.starts_with('/') {
        return Err(invalid());
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|component| component.is_empty() || component.starts_with('.'))
    {
        return Err(invalid());
    }
    Ok(())
}

/// Lowercase hex rendering of an MD5 digest.
pub(crate) fn hex_digest(digest: md5::Digest) -> String {
    format!("{:x}", digest)
}
