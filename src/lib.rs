//! Resumable chunked upload service.
//!
//! Clients open an upload session, send fixed-size chunks in any order (and
//! retry individual chunks), then ask the server to merge them. Merged files
//! are indexed by MD5 so a repeated upload of known content completes
//! instantly.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::{Router, extract::DefaultBodyLimit};
use services::UploadService;
use tower_http::trace::TraceLayer;

/// Room for multipart framing around the largest chunk.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Assemble the HTTP application around `service`.
pub fn app(service: UploadService, max_chunk_bytes: usize) -> Router {
    routes::routes()
        .layer(DefaultBodyLimit::max(max_chunk_bytes.saturating_add(BODY_OVERHEAD)))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
