#![cfg(feature = "server")]

use std::io::Cursor;
use std::path::Path;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use watermark_inpaint::server::{router, AppState, ServerConfig};
use watermark_inpaint::WatermarkRemover;

const BOUNDARY: &str = "watermark-test-boundary";

fn app(upload_dir: &Path) -> Router {
    app_with(ServerConfig {
        upload_dir: upload_dir.to_path_buf(),
        ..ServerConfig::default()
    })
}

fn app_with(config: ServerConfig) -> Router {
    router(AppState::new(WatermarkRemover::default(), config))
}

fn fixture_png() -> Vec<u8> {
    let img = RgbImage::from_fn(200, 200, |x, y| {
        if (50..150).contains(&x) && (50..150).contains(&y) {
            Rgb([200, 200, 200])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_request(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/remove-watermark")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(dir.path())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn remove_watermark_writes_processed_file() {
    let dir = tempfile::tempdir().unwrap();
    let request = multipart_request("file", "test_watermark.png", "image/png", &fixture_png());
    let response = app(dir.path()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["filename"], "nowatermark_test_watermark.png");

    let saved = dir.path().join("nowatermark_test_watermark.png");
    assert!(saved.exists());
    let img = image::open(saved).unwrap();
    assert_eq!((img.width(), img.height()), (200, 200));
}

#[tokio::test]
async fn unusual_extension_is_saved_as_png() {
    let dir = tempfile::tempdir().unwrap();
    let request = multipart_request("file", "scan.webp", "image/webp", &fixture_png());
    let response = app(dir.path()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["filename"], "nowatermark_scan.png");
}

#[tokio::test]
async fn non_image_content_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let request = multipart_request("file", "test.txt", "text/plain", b"This is not an image");
    let response = app(dir.path()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "File must be an image");
}

#[tokio::test]
async fn undecodable_image_is_a_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let request = multipart_request("file", "broken.png", "image/png", b"garbage bytes");
    let response = app(dir.path()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("decode"), "{detail}");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let request = multipart_request("other", "x.png", "image/png", &fixture_png());
    let response = app(dir.path()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(ServerConfig {
        upload_dir: dir.path().to_path_buf(),
        max_upload_size: 1024,
        ..ServerConfig::default()
    });
    let request = multipart_request("file", "big.png", "image/png", &vec![0_u8; 4096]);
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unwritable_upload_dir_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the upload directory should be
    let blocker = dir.path().join("uploads");
    std::fs::write(&blocker, b"x").unwrap();

    let request = multipart_request("file", "test_watermark.png", "image/png", &fixture_png());
    let response = app(&blocker).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("failed to write output image"), "{detail}");
}
