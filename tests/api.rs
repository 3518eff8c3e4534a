mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use chunk_store::{
    handlers::upload_handlers::{ChunkUploadResp, CompleteResp, InitResp, StatusResp},
    services::blob::MemoryBlobStore,
};
use common::*;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> (Router, Harness) {
    let h = harness(Arc::new(MemoryBlobStore::new())).await;
    (chunk_store::app(h.service.clone(), 1024 * 1024), h)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn init_request(body: Value) -> Request<Body> {
    Request::post("/api/oss/upload/init")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn raw_chunk(upload_id: &str, index: &str, bytes: &[u8]) -> Request<Body> {
    Request::post(format!("/api/oss/upload/{}/chunk/{}", upload_id, index))
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes.to_vec()))
        .unwrap()
}

fn multipart_chunk(upload_id: &str, index: usize, bytes: &[u8]) -> Request<Body> {
    let boundary = "chunkstoreboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::post(format!("/api/oss/upload/{}/chunk/{}", upload_id, index))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn full_protocol_over_http() {
    let (app, _h) = app().await;
    let file = content(2500);

    let response = send(
        &app,
        init_request(json!({
            "file_name": "clip.mp4",
            "file_size": 2500,
            "file_type": "video/mp4",
            "chunk_size": 1000
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let init: InitResp = body_json(response).await;
    assert_eq!(init.chunk_count, 3);
    assert!(init.instant_upload.is_none());
    let id = init.upload_id;

    // Raw body with a Content-MD5 header.
    let digest = md5::compute(&file[..1000]);
    let mut request = raw_chunk(&id, "0", &file[..1000]);
    request.headers_mut().insert(
        "content-md5",
        general_purpose::STANDARD.encode(digest.0).parse().unwrap(),
    );
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let chunk: ChunkUploadResp = body_json(response).await;
    assert_eq!(chunk.chunk_index, 0);
    assert_eq!(chunk.status, "Chunk uploaded");
    assert_eq!(chunk.progress, 33);

    // Multipart bodies are accepted too.
    let response = send(&app, multipart_chunk(&id, 2, &file[2000..])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::get(format!("/api/oss/upload/{}/status", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let status: StatusResp = body_json(response).await;
    assert_eq!(status.status, "uploading");
    assert_eq!(status.uploaded_chunks, 2);
    assert_eq!(status.total_chunks, 3);
    assert_eq!(status.progress, 66);
    let states: Vec<_> = status.chunk_status.iter().map(|c| c.status.as_str()).collect();
    assert_eq!(states, vec!["uploaded", "pending", "uploaded"]);

    let response = send(&app, raw_chunk(&id, "1", &file[1000..2000])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::post(format!("/api/oss/upload/{}/complete", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let done: CompleteResp = body_json(response).await;
    assert_eq!(done.status, "completed");
    assert_eq!(done.etag, md5_hex(&file));
    assert_eq!(done.file_size, 2500);

    let response = send(&app, Request::get(&done.file_url).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::ETAG],
        format!("\"{}\"", done.etag).as_str()
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), file.as_slice());

    // Same content again completes without any chunk traffic.
    let response = send(
        &app,
        init_request(json!({
            "fileName": "again.mp4",
            "fileSize": 2500,
            "chunkSize": 1000,
            "fileHash": done.etag
        })),
    )
    .await;
    let instant: Value = body_json(response).await;
    assert_eq!(instant["instantUpload"], true);
    assert_eq!(instant["chunkCount"], 0);
    assert_eq!(instant["objectKey"], done.object_key.as_str());
    assert_eq!(instant["fileUrl"], done.file_url.as_str());
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let (app, _h) = app().await;

    let response = send(&app, init_request(json!({ "file_name": "", "file_size": 10, "chunk_size": 5 }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, raw_chunk("nope", "0", b"abc")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(response).await;
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let response = send(&app, init_request(json!({ "file_name": "e.bin", "file_size": 10, "chunk_size": 5 }))).await;
    let init: InitResp = body_json(response).await;
    let id = init.upload_id;

    let response = send(&app, raw_chunk(&id, "abc", b"12345")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "Invalid chunkIndex");

    let response = send(&app, raw_chunk(&id, "0", b"123")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, raw_chunk(&id, "0", b"12345")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&app, raw_chunk(&id, "0", b"12345")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let mut bad_md5 = raw_chunk(&id, "1", b"67890");
    bad_md5
        .headers_mut()
        .insert("content-md5", "not-base64!".parse().unwrap());
    let response = send(&app, bad_md5).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::post(format!("/api/oss/upload/{}/complete", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::get("/api/oss/upload/missing/status")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn objects_can_be_deleted() {
    let (app, h) = app().await;
    let file = content(12);

    let id = h
        .service
        .create_session(new_session("gone.txt", 12, 6))
        .await
        .unwrap()
        .upload_id;
    upload_all(&h.service, &id, &file, 6).await;
    let done = h.service.complete(&id).await.unwrap();

    let response = send(
        &app,
        Request::delete(format!("/api/oss/objects/{}", done.object_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = body_json(response).await;
    assert_eq!(body["objectId"], done.object_id);
    assert_eq!(body["status"], "deleted");

    let response = send(&app, Request::get(&done.file_url).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        Request::delete(format!("/api/oss/objects/{}", done.object_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let (app, _h) = app().await;

    let response = send(&app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, Request::get("/readyz").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = body_json(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["blobs"]["ok"], true);
}
