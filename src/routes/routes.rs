//! Defines routes for the chunked upload API.
//!
//! ## Structure
//! - **Upload protocol** (under `/api/oss`)
//!   - `POST /upload/init`: create a session (or instant-complete it)
//!   - `POST /upload/{uploadId}/chunk/{chunkIndex}`: upload one chunk
//!   - `POST /upload/{uploadId}/complete`: merge chunks into the final file
//!   - `GET  /upload/{uploadId}/status`: progress and per-chunk state
//!
//! - **Artifacts**
//!   - `GET    /files/{*key}`: download a finished file
//!   - `DELETE /api/oss/objects/{id}`: soft-delete a finished file
//!
//! The wildcard `*key` carries nested object keys like `objects/2026/10/19/<id>_a.mp4`.

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file},
        health_handlers::{healthz, readyz},
        upload_handlers::{complete_upload, init_upload, upload_chunk, upload_status},
    },
    services::UploadService,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build the router for every endpoint.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    let upload = Router::new()
        .route("/upload/init", post(init_upload))
        .route("/upload/{upload_id}/chunk/{chunk_index}", post(upload_chunk))
        .route("/upload/{upload_id}/complete", post(complete_upload))
        .route("/upload/{upload_id}/status", get(upload_status))
        .route("/objects/{id}", delete(delete_file));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files/{*key}", get(download_file))
        .nest("/api/oss", upload)
}
