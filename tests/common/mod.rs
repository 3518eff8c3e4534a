#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunk_store::{
    db,
    services::{
        ChunkPayload, NewSession, UploadService, UploadSettings,
        blob::{
            BlobError, BlobReceipt, BlobResult, BlobStore, ByteStream, FilesystemBlobStore,
            MemoryBlobStore,
        },
    },
};
use futures::stream;
use sqlx::SqlitePool;
use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tempfile::TempDir;

pub struct Harness {
    pub service: UploadService,
    pub pool: Arc<SqlitePool>,
    _dir: TempDir,
}

/// Service over a fresh migrated SQLite file and the given blob store.
pub async fn harness_with(blobs: Arc<dyn BlobStore>, settings: UploadSettings) -> Harness {
    open(tempfile::tempdir().unwrap(), blobs, settings).await
}

/// Service backed by `FilesystemBlobStore`; returns the blob root as well.
pub async fn filesystem_harness() -> (Harness, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("blobs");
    let blobs = Arc::new(FilesystemBlobStore::new(&root));
    (open(dir, blobs, UploadSettings::default()).await, root)
}

async fn open(dir: TempDir, blobs: Arc<dyn BlobStore>, settings: UploadSettings) -> Harness {
    let url = format!("sqlite://{}", dir.path().join("meta.db").display());
    let pool = db::connect(&url, 5).await.unwrap();
    db::migrate(&pool).await.unwrap();
    let pool = Arc::new(pool);

    Harness {
        service: UploadService::new(pool.clone(), blobs, settings),
        pool,
        _dir: dir,
    }
}

pub async fn harness(blobs: Arc<MemoryBlobStore>) -> Harness {
    harness_with(blobs, UploadSettings::default()).await
}

/// Deterministic test content of `len` bytes.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Payload split into several stream items, announcing its length.
pub fn payload(bytes: &[u8]) -> ChunkPayload {
    let pieces: Vec<BlobResult<Bytes>> = bytes
        .chunks(7)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect();
    ChunkPayload {
        data: Box::pin(stream::iter(pieces)),
        declared_size: Some(bytes.len() as i64),
        expected_md5: None,
    }
}

pub fn new_session(name: &str, file_size: i64, chunk_size: i64) -> NewSession {
    NewSession {
        file_name: name.into(),
        file_size,
        chunk_size,
        file_type: "application/octet-stream".into(),
        ..NewSession::default()
    }
}

/// Upload every chunk of `file` in order.
pub async fn upload_all(service: &UploadService, upload_id: &str, file: &[u8], chunk_size: usize) {
    for (index, chunk) in file.chunks(chunk_size).enumerate() {
        service
            .accept_chunk(upload_id, index as i64, payload(chunk))
            .await
            .unwrap();
    }
}

/// Wraps a memory store and can be told to fail reads of chunk payloads.
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_chunk_reads: AtomicBool,
}

impl FlakyBlobStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_chunk_reads.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(
        &self,
        scope: &str,
        name: &str,
        data: ByteStream,
        expected_size: u64,
    ) -> BlobResult<BlobReceipt> {
        self.inner.put(scope, name, data, expected_size).await
    }

    async fn open_for_read(&self, location: &str) -> BlobResult<ByteStream> {
        if self.fail_chunk_reads.load(Ordering::SeqCst) && location.contains("/chunk_1.") {
            return Err(BlobError::Io(io::Error::other("simulated read failure")));
        }
        self.inner.open_for_read(location).await
    }

    async fn delete(&self, location: &str) -> BlobResult<()> {
        self.inner.delete(location).await
    }

    async fn delete_scope(&self, scope: &str) -> BlobResult<()> {
        self.inner.delete_scope(scope).await
    }
}
