//! Local filesystem blob store.
//!
//! Payloads live at `root/{location}`. Every write goes to a `.tmp-<uuid>` file
//! beside its destination, is fsynced, and is then renamed into place, so a
//! reader either sees the complete blob or nothing.

use super::{
    BlobError, BlobReceipt, BlobResult, BlobStore, ByteStream, ensure_key_safe, hex_digest,
    join_key,
};
use async_trait::async_trait;
use futures::StreamExt;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Read buffer size for streaming blobs back out (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> BlobResult<PathBuf> {
        ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }

    /// Create the temp file, recreating the parent if a concurrent prune removed it.
    async fn create_temp(parent: &Path, tmp_path: &Path) -> io::Result<File> {
        fs::create_dir_all(parent).await?;
        match File::create(tmp_path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(parent).await?;
                File::create(tmp_path).await
            }
            other => other,
        }
    }

    /// Stream `data` into `file`, enforcing the exact size and hashing as we go.
    async fn write_all_checked(
        mut file: File,
        mut data: ByteStream,
        expected_size: u64,
    ) -> BlobResult<String> {
        let mut written: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > expected_size {
                return Err(BlobError::SizeMismatch {
                    expected: expected_size,
                    actual: written,
                });
            }
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        if written != expected_size {
            return Err(BlobError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(hex_digest(digest.compute()))
    }

    /// Recursively remove empty directories up to the store root.
    ///
    /// Stops when a directory is not empty, is already gone, or the root is reached.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    #[instrument(skip(self, data), fields(backend = "filesystem"))]
    async fn put(
        &self,
        scope: &str,
        name: &str,
        data: ByteStream,
        expected_size: u64,
    ) -> BlobResult<BlobReceipt> {
        let location = join_key(scope, name);
        let final_path = self.blob_path(&location)?;
        let parent = final_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BlobError::InvalidKey(location.clone()))?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let file = Self::create_temp(&parent, &tmp_path).await?;
        let md5 = match Self::write_all_checked(file, data, expected_size).await {
            Ok(md5) => md5,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&final_path).await?;
                fs::rename(&tmp_path, &final_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobError::Io(err));
            }
        }

        debug!(%location, size = expected_size, "published blob");
        Ok(BlobReceipt {
            location,
            size: expected_size,
            md5,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open_for_read(&self, location: &str) -> BlobResult<ByteStream> {
        let path = self.blob_path(location)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(location.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(BlobError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, location: &str) -> BlobResult<()> {
        let path = self.blob_path(location)?;
        fs::remove_file(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(location.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_scope(&self, scope: &str) -> BlobResult<()> {
        let path = self.blob_path(scope.trim_end_matches('/'))?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => debug!("removed scope {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(BlobError::Io(err)),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}
