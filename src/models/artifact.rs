//! Represents a finished file produced by an upload session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Active,
    Deleted,
}

/// A finished, immutable stored object.
///
/// Created exactly once per distinct content hash and shared by every session
/// that uploads the same bytes. Only `status` ever changes after creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Artifact {
    /// Internal row id, returned to clients as `objectId`.
    pub id: i64,

    pub file_name: String,

    /// Size in bytes.
    pub file_size: i64,

    /// Media type declared by the uploading client.
    pub file_type: String,

    /// MIME type served on download.
    pub mime_type: String,

    /// Logical bucket the artifact belongs to.
    pub bucket: String,

    /// Blob store location of the merged bytes.
    pub object_key: String,

    /// Lowercase hex MD5 of the content; the dedup key.
    pub etag: String,

    /// Public access URL.
    pub url: String,

    pub user_id: Option<i64>,
    pub business_id: Option<String>,

    /// Soft-delete marker.
    pub status: ArtifactStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a freshly merged artifact.
#[derive(Clone, Debug)]
pub struct NewArtifact {
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub mime_type: String,
    pub bucket: String,
    pub object_key: String,
    pub etag: String,
    pub url: String,
    pub user_id: Option<i64>,
    pub business_id: Option<String>,
}
