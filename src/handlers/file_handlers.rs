//! HTTP handlers for finished artifacts.
//! Bodies are streamed from the blob store without buffering.

use crate::{errors::AppError, models::Artifact, services::UploadService};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResp {
    pub object_id: i64,
    pub object_key: String,
    pub etag: String,
    pub status: String,
}

/// GET `/files/{*key}`: download an artifact by its object key.
pub async fn download_file(
    State(service): State<UploadService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (artifact, stream) = service.open_artifact(&key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_artifact_headers(response.headers_mut(), &artifact);
    Ok(response)
}

/// DELETE `/api/oss/objects/{id}`: soft-delete an artifact.
pub async fn delete_file(
    State(service): State<UploadService>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResp>, AppError> {
    let id: i64 = id
        .parse()
        .map_err(|_| AppError::bad_request("Invalid object id"))?;
    let artifact = service.delete_artifact(id).await?;

    Ok(Json(DeletedResp {
        object_id: artifact.id,
        object_key: artifact.object_key,
        etag: artifact.etag,
        status: "deleted".into(),
    }))
}

fn set_artifact_headers(headers: &mut HeaderMap, artifact: &Artifact) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&artifact.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(artifact.file_size.max(0)),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", artifact.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&artifact.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
