//! Core data models for the chunked upload service.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`. Status columns are closed enums.

pub mod artifact;
pub mod session;

pub use artifact::{Artifact, ArtifactStatus, NewArtifact};
pub use session::{ChunkSlot, SessionStatus, SlotStatus, UploadSession};
