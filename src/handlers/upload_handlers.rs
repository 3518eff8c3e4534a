//! HTTP handlers for the chunked upload protocol.
//!
//! - `POST /api/oss/upload/init`
//! - `POST /api/oss/upload/{uploadId}/chunk/{chunkIndex}`
//! - `POST /api/oss/upload/{uploadId}/complete`
//! - `GET  /api/oss/upload/{uploadId}/status`
//!
//! Chunk bodies are streamed into the blob store; only multipart bodies are
//! buffered (one chunk at a time).

use crate::{
    errors::AppError,
    services::{
        ChunkPayload, CompletedUpload, NewSession, SessionReport, UploadService,
        blob::{BlobError, ByteStream},
    },
};
use axum::{
    Json, RequestExt,
    extract::{FromRequest, Multipart, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::io;

/// Body of `POST /upload/init`.
///
/// Field names are snake_case on the wire; camelCase aliases
/// are accepted as well.
#[derive(Debug, Deserialize)]
pub struct InitReq {
    #[serde(default, alias = "fileName")]
    pub file_name: String,
    #[serde(default, alias = "fileSize")]
    pub file_size: i64,
    #[serde(default, alias = "fileType")]
    pub file_type: String,
    #[serde(default, alias = "chunkSize")]
    pub chunk_size: i64,
    /// MD5 of the whole file, used for instant upload.
    #[serde(default, alias = "fileHash", alias = "file_hash", alias = "fileMd5")]
    pub file_md5: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<i64>,
    #[serde(default, alias = "businessId")]
    pub business_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResp {
    pub upload_id: String,
    pub chunk_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instant_upload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResp {
    pub chunk_index: i64,
    pub status: String,
    pub progress: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResp {
    pub status: String,
    pub file_url: String,
    pub file_size: i64,
    pub file_name: String,
    pub object_key: String,
    pub etag: String,
    pub object_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResp {
    pub upload_id: String,
    pub status: String,
    pub progress: i64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    pub chunk_status: Vec<ChunkStatusDetail>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatusDetail {
    pub chunk_index: i64,
    pub status: String,
}

impl From<CompletedUpload> for CompleteResp {
    fn from(done: CompletedUpload) -> Self {
        Self {
            status: done.status.as_str().to_string(),
            file_url: done.file_url,
            file_size: done.file_size,
            file_name: done.file_name,
            object_key: done.object_key,
            etag: done.etag,
            object_id: done.object_id,
        }
    }
}

impl From<SessionReport> for StatusResp {
    fn from(report: SessionReport) -> Self {
        Self {
            upload_id: report.upload_id,
            status: report.status.as_str().to_string(),
            progress: report.progress,
            uploaded_chunks: report.uploaded_chunks,
            total_chunks: report.total_chunks,
            chunk_status: report
                .chunks
                .into_iter()
                .map(|chunk| ChunkStatusDetail {
                    chunk_index: chunk.chunk_index,
                    status: chunk.status.as_str().to_string(),
                })
                .collect(),
        }
    }
}

/// `POST /api/oss/upload/init`
pub async fn init_upload(
    State(service): State<UploadService>,
    payload: Result<Json<InitReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;

    let created = service
        .create_session(NewSession {
            file_name: req.file_name,
            file_size: req.file_size,
            chunk_size: req.chunk_size,
            file_type: req.file_type,
            content_hash: req.file_md5,
            user_id: req.user_id,
            business_id: req.business_id,
        })
        .await?;

    let resp = match created.instant {
        Some(instant) => InitResp {
            upload_id: created.upload_id,
            chunk_count: 0,
            instant_upload: Some(true),
            file_url: Some(instant.url),
            object_key: Some(instant.object_key),
        },
        None => InitResp {
            upload_id: created.upload_id,
            chunk_count: created.chunk_count,
            instant_upload: None,
            file_url: None,
            object_key: None,
        },
    };
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /api/oss/upload/{uploadId}/chunk/{chunkIndex}`
///
/// The body is either the raw chunk bytes or a `multipart/form-data` form with
/// a `chunk` file field. An optional `Content-MD5` header is verified.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    Path((upload_id, chunk_index)): Path<(String, String)>,
    request: Request,
) -> Result<Json<ChunkUploadResp>, AppError> {
    let chunk_index: i64 = chunk_index
        .parse()
        .map_err(|_| AppError::bad_request("Invalid chunkIndex"))?;
    let expected_md5 = content_md5(request.headers())?;

    let (data, declared_size) = if is_multipart(request.headers()) {
        multipart_chunk(request).await?
    } else {
        raw_chunk(request)
    };

    let accepted = service
        .accept_chunk(
            &upload_id,
            chunk_index,
            ChunkPayload {
                data,
                declared_size,
                expected_md5,
            },
        )
        .await?;

    Ok(Json(ChunkUploadResp {
        chunk_index: accepted.chunk_index,
        status: "Chunk uploaded".into(),
        progress: accepted.progress,
    }))
}

/// `POST /api/oss/upload/{uploadId}/complete`
pub async fn complete_upload(
    State(service): State<UploadService>,
    Path(upload_id): Path<String>,
) -> Result<Json<CompleteResp>, AppError> {
    let done = service.complete(&upload_id).await?;
    Ok(Json(done.into()))
}

/// `GET /api/oss/upload/{uploadId}/status`
pub async fn upload_status(
    State(service): State<UploadService>,
    Path(upload_id): Path<String>,
) -> Result<Json<StatusResp>, AppError> {
    let report = service.status(&upload_id).await?;
    Ok(Json(report.into()))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Stream a raw body; the declared size comes from `Content-Length`.
fn raw_chunk(request: Request) -> (ByteStream, Option<i64>) {
    let declared_size = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    let stream = request
        .into_limited_body()
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| BlobError::Io(io::Error::other(err))));
    (Box::pin(stream), declared_size)
}

/// Pull the `chunk` field out of a multipart form; its length is the declared size.
async fn multipart_chunk(request: Request) -> Result<(ByteStream, Option<i64>), AppError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some("chunk") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        let declared_size = bytes.len() as i64;
        let data: ByteStream = Box::pin(stream::once(async move { Ok::<_, BlobError>(bytes) }));
        return Ok((data, Some(declared_size)));
    }

    Err(AppError::bad_request("No chunk file provided"))
}

/// Decode an RFC 1864 `Content-MD5` header (base64) into lowercase hex.
fn content_md5(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get("content-md5") else {
        return Ok(None);
    };
    let invalid = || AppError::bad_request("Invalid Content-MD5 header");
    let raw = value.to_str().map_err(|_| invalid())?;
    let digest = general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| invalid())?;
    if digest.len() != 16 {
        return Err(invalid());
    }
    Ok(Some(digest.iter().map(|b| format!("{:02x}", b)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn content_md5_decodes_to_hex() {
        let mut headers = HeaderMap::new();
        let digest = md5::compute(b"hello");
        headers.insert(
            "content-md5",
            HeaderValue::from_str(&general_purpose::STANDARD.encode(digest.0)).unwrap(),
        );
        assert_eq!(
            content_md5(&headers).unwrap(),
            Some(format!("{:x}", digest))
        );
    }

    #[test]
    fn malformed_content_md5_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("content-md5", HeaderValue::from_static("not base64!"));
        assert_eq!(
            content_md5(&headers).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );

        headers.insert("content-md5", HeaderValue::from_static("YWJj"));
        assert!(content_md5(&headers).is_err());
    }

    #[test]
    fn init_accepts_both_field_styles() {
        let snake: InitReq = serde_json::from_str(
            r#"{"file_name":"a.bin","file_size":10,"file_type":"application/octet-stream","chunk_size":4,"file_md5":"abc"}"#,
        )
        .unwrap();
        let camel: InitReq = serde_json::from_str(
            r#"{"fileName":"a.bin","fileSize":10,"chunkSize":4,"fileHash":"abc"}"#,
        )
        .unwrap();

        for req in [snake, camel] {
            assert_eq!(req.file_name, "a.bin");
            assert_eq!(req.file_size, 10);
            assert_eq!(req.chunk_size, 4);
            assert_eq!(req.file_md5.as_deref(), Some("abc"));
        }
    }

    #[test]
    fn multipart_detection_ignores_case_and_boundary() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Multipart/Form-Data; boundary=xyz"),
        );
        assert!(is_multipart(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        assert!(!is_multipart(&headers));
    }
}
