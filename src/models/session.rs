//! Upload sessions and the per-chunk slots they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an upload session.
///
/// `Uploading` is the only non-terminal state; every other state is final.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Uploading => "uploading",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Uploading)
    }
}

/// State of one chunk slot.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SlotStatus {
    Pending,
    Uploaded,
    Failed,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Pending => "pending",
            SlotStatus::Uploaded => "uploaded",
            SlotStatus::Failed => "failed",
        }
    }
}

/// One client-initiated upload transaction.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    /// Opaque, globally unique identifier handed to the client.
    pub upload_id: String,

    /// Name the client declared for the finished file.
    pub file_name: String,

    /// Declared total size in bytes.
    pub file_size: i64,

    /// Declared MIME / media type.
    pub file_type: String,

    /// Size of every chunk except possibly the last.
    pub chunk_size: i64,

    /// `ceil(file_size / chunk_size)`, or 0 for an instant upload.
    pub chunk_count: i64,

    pub status: SessionStatus,

    /// Last recomputed count of slots in state `uploaded`.
    pub uploaded_chunks: i64,

    /// Last recomputed progress percentage (0..=100).
    pub progress: i64,

    /// Storage key of the finished artifact, once completed.
    pub object_key: Option<String>,

    /// Access URL of the finished artifact, once completed.
    pub url: Option<String>,

    /// Content hash of the finished artifact, once completed.
    pub etag: Option<String>,

    /// Back-reference to the artifact record, once completed.
    pub artifact_id: Option<i64>,

    pub user_id: Option<i64>,
    pub business_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One fixed-size contiguous byte range of the target file.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ChunkSlot {
    pub upload_id: String,

    /// 0-based position of the chunk in the file.
    pub chunk_index: i64,

    /// Exact number of bytes this slot must receive.
    pub expected_size: i64,

    pub status: SlotStatus,

    /// Blob store location of the payload; set only when uploaded.
    pub storage_location: Option<String>,

    /// MD5 (hex) of the payload; set only when uploaded.
    pub checksum: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// Expected byte size of every slot for a file of `file_size` bytes split into
/// `chunk_size` pieces. All slots are `chunk_size` long except the last, which
/// holds the remainder.
///
/// Callers must pass positive sizes.
pub fn plan_chunks(file_size: i64, chunk_size: i64) -> Vec<i64> {
    let count = chunk_count(file_size, chunk_size);
    (0..count)
        .map(|index| {
            if index == count - 1 {
                file_size - chunk_size * (count - 1)
            } else {
                chunk_size
            }
        })
        .collect()
}

/// `ceil(file_size / chunk_size)` for positive sizes.
pub fn chunk_count(file_size: i64, chunk_size: i64) -> i64 {
    let whole = file_size / chunk_size;
    if file_size % chunk_size != 0 {
        whole + 1
    } else {
        whole
    }
}
