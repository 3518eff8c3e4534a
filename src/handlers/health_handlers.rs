//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and blob store I/O

use crate::services::{
    UploadService,
    blob::{BlobError, BlobStore, ByteStream},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const SAMPLE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Liveness check. Always 200, never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness check that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Writes, reads back and deletes a small blob under the `health` scope.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let blob_check = check_blob_store(&*service.blobs).await;

    let overall_ok = sqlite_check.0 && blob_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "blobs",
        CheckStatus {
            ok: blob_check.0,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_blob_store(blobs: &dyn BlobStore) -> (bool, Option<String>) {
    let data: ByteStream = Box::pin(stream::once(async {
        Ok::<_, BlobError>(Bytes::from_static(SAMPLE))
    }));
    let receipt = match blobs
        .put("health", &Uuid::new_v4().to_string(), data, SAMPLE.len() as u64)
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => return (false, Some(format!("could not write sample: {}", e))),
    };

    let read = match blobs.open_for_read(&receipt.location).await {
        Ok(stream) => {
            stream
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
        }
        Err(e) => Err(e),
    };
    let outcome = match read {
        Ok(bytes) if bytes == SAMPLE => (true, None),
        Ok(_) => (false, Some("sample content mismatch".to_string())),
        Err(e) => (false, Some(format!("could not read sample: {}", e))),
    };

    match blobs.delete(&receipt.location).await {
        Ok(()) => outcome,
        Err(e) if outcome.0 => (true, Some(format!("could not remove sample: {}", e))),
        Err(_) => outcome,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
