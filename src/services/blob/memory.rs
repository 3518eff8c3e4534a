//! In-memory blob store, used by tests and single-process experiments.

use super::{
    BlobError, BlobReceipt, BlobResult, BlobStore, ByteStream, ensure_key_safe, hex_digest,
    join_key,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

#[derive(Default, Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published blobs.
    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Published locations under `scope`, sorted.
    pub fn keys_under(&self, scope: &str) -> Vec<String> {
        let prefix = format!("{}/", scope.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Copy of a blob's bytes, if published.
    pub fn get(&self, location: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        scope: &str,
        name: &str,
        mut data: ByteStream,
        expected_size: u64,
    ) -> BlobResult<BlobReceipt> {
        let location = join_key(scope, name);
        ensure_key_safe(&location)?;

        let mut buf = BytesMut::new();
        let mut digest = md5::Context::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            if (buf.len() + chunk.len()) as u64 > expected_size {
                return Err(BlobError::SizeMismatch {
                    expected: expected_size,
                    actual: (buf.len() + chunk.len()) as u64,
                });
            }
            digest.consume(&chunk);
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != expected_size {
            return Err(BlobError::SizeMismatch {
                expected: expected_size,
                actual: buf.len() as u64,
            });
        }

        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.clone(), buf.freeze());
        Ok(BlobReceipt {
            location,
            size: expected_size,
            md5: hex_digest(digest.compute()),
        })
    }

    async fn open_for_read(&self, location: &str) -> BlobResult<ByteStream> {
        let bytes = self
            .get(location)
            .ok_or_else(|| BlobError::NotFound(location.to_string()))?;
        Ok(Box::pin(stream::once(async move { Ok::<_, BlobError>(bytes) })))
    }

    async fn delete(&self, location: &str) -> BlobResult<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(location.to_string()))
    }

    async fn delete_scope(&self, scope: &str) -> BlobResult<()> {
        let prefix = format!("{}/", scope.trim_end_matches('/'));
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
