//! Security tests for lungscan-api
//!
//! The API key check must reject before the body is read and before any
//! pipeline work; public endpoints stay open.

mod helpers;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::*;
use image::ImageFormat;
use tower::util::ServiceExt;

fn valid_upload() -> Vec<u8> {
    multipart_body(
        "file",
        "scan.png",
        "image/png",
        &encode_rgb([60, 60, 60], ImageFormat::Png),
    )
}

#[tokio::test]
async fn test_missing_key_rejected_without_pipeline() {
    let (context, calls) = counting_context();
    let app = setup_app(context);

    let response = app.oneshot(predict_request(None, valid_upload())).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"], "Invalid API key");
    assert!(body["details"].is_null());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_key_rejected_without_pipeline() {
    let (context, calls) = counting_context();
    let app = setup_app(context);

    let response = app
        .oneshot(predict_request(Some("not-the-key"), valid_upload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_key_comparison_is_exact() {
    let app = setup_app(test_context());

    for key in ["TEST-API-KEY", "test-api-key ", "test-api-ke", ""] {
        let response = app
            .clone()
            .oneshot(predict_request(Some(key), valid_upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "key {key:?}");
    }
}

#[tokio::test]
async fn test_auth_checked_before_body() {
    let app = setup_app(test_context());

    // Not multipart at all: a body-level check would answer 400
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/predict")
        .header("content-type", "text/plain")
        .header("x-api-key", "wrong")
        .body(Body::from("garbage"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_auth_checked_before_size_limit() {
    let app = setup_app_with_limit(test_context(), 16);

    let response = app.oneshot(predict_request(None, valid_upload())).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_valid_key_runs_pipeline() {
    let (context, calls) = counting_context();
    let app = setup_app(context);

    let response = app
        .oneshot(predict_request(Some(TEST_API_KEY), valid_upload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // One forward pass per extractor
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_public_endpoints_ignore_bad_key() {
    let app = setup_app(test_context());

    for uri in ["/", "/health"] {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-api-key", "wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}
