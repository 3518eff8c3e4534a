//! Upload engine services.
//!
//! - `session_manager`: session creation, chunk acceptance, status
//! - `assembler`: ordered merge with inline hashing
//! - `session_store` / `dedup_index`: SQLite-backed records
//! - `artifact_access`: download and soft delete of finished artifacts
//! - `blob`: byte storage behind the `BlobStore` trait

mod artifact_access;
pub mod assembler;
pub mod blob;
pub mod dedup_index;
pub mod error;
pub mod locks;
pub mod progress;
pub mod session_manager;
pub mod session_store;

pub use assembler::CompletedUpload;
pub use error::{UploadError, UploadResult};
pub use session_manager::{
    ChunkAccepted, ChunkPayload, ChunkState, InstantUpload, NewSession, SessionCreated,
    SessionReport, UploadService, UploadSettings,
};
