mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chunk_store::services::UploadError;
use common::*;
use tower::ServiceExt;

#[tokio::test]
async fn upload_round_trips_through_disk() {
    let (h, root) = filesystem_harness().await;
    let file = content(100);
    let id = h
        .service
        .create_session(new_session("disk.bin", 100, 32))
        .await
        .unwrap()
        .upload_id;

    for index in [3usize, 1, 0, 2] {
        let start = index * 32;
        let end = (start + 32).min(file.len());
        h.service
            .accept_chunk(&id, index as i64, payload(&file[start..end]))
            .await
            .unwrap();
    }
    assert_eq!(std::fs::read_dir(root.join("chunks").join(&id)).unwrap().count(), 4);

    let done = h.service.complete(&id).await.unwrap();
    assert_eq!(done.etag, md5_hex(&file));
    assert_eq!(std::fs::read(root.join(&done.object_key)).unwrap(), file);
    assert!(!root.join("chunks").join(&id).exists());

    let app = chunk_store::app(h.service.clone(), 1024 * 1024);
    let response = app
        .oneshot(
            Request::get(format!("/files/{}", done.object_key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &file[..]);
}

#[tokio::test]
async fn longest_file_name_fits_on_disk() {
    let (h, root) = filesystem_harness().await;
    let file = content(10);

    let longest = format!("{}.bin", "n".repeat(214));
    assert_eq!(longest.len(), 218);
    let id = h
        .service
        .create_session(new_session(&longest, 10, 10))
        .await
        .unwrap()
        .upload_id;
    upload_all(&h.service, &id, &file, 10).await;
    let done = h.service.complete(&id).await.unwrap();
    assert!(done.object_key.ends_with(&format!("{}_{}", id, longest)));
    assert_eq!(std::fs::read(root.join(&done.object_key)).unwrap(), file);

    let too_long = format!("{}.bin", "n".repeat(215));
    assert!(matches!(
        h.service
            .create_session(new_session(&too_long, 10, 10))
            .await,
        Err(UploadError::InvalidArgument(_))
    ));
}
