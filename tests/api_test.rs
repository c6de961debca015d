//! HTTP contract tests
//!
//! Drives the router in-process with a stub classifier so no model file is needed.

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header::CONTENT_TYPE, StatusCode},
    Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thai_food_classifier::config::DetectionConfig;
use thai_food_classifier::metrics::ServiceMetrics;
use thai_food_classifier::models::inference::Classifier;
use thai_food_classifier::preprocess::ImageTensor;
use thai_food_classifier::{router, AppState, ImagePreprocessor, InferenceEngine};
use tower::ServiceExt;

const BOUNDARY: &str = "thaifoodboundary";

const LABELS: [&str; 7] = [
    "ต้มยำกุ้ง",
    "ผัดไทย",
    "ส้มตำ",
    "แกงเขียวหวาน",
    "ข้าวมันไก่",
    "ข้าวผัด",
    "มัสมั่น",
];

/// Returns fixed probabilities, or fails on demand
struct StubClassifier {
    probabilities: Vec<f32>,
    fail: bool,
    calls: AtomicUsize,
}

impl Classifier for StubClassifier {
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.batch_shape(), [1, 128, 128, 3]);
        if self.fail {
            anyhow::bail!("inference backend unavailable");
        }
        Ok(self.probabilities.clone())
    }

    fn output_width(&self) -> Option<usize> {
        Some(self.probabilities.len())
    }
}

struct TestApp {
    app: Router,
    classifier: Arc<StubClassifier>,
    metrics: Arc<ServiceMetrics>,
}

fn test_app(probabilities: Vec<f32>, fail: bool) -> TestApp {
    test_app_with_limit(probabilities, fail, 16 * 1024 * 1024)
}

fn test_app_with_limit(probabilities: Vec<f32>, fail: bool, body_limit: usize) -> TestApp {
    let classifier = Arc::new(StubClassifier {
        probabilities,
        fail,
        calls: AtomicUsize::new(0),
    });
    let engine = InferenceEngine::with_classifier(
        classifier.clone(),
        LABELS.iter().map(|s| s.to_string()).collect(),
        ImagePreprocessor::new(128),
        DetectionConfig::default(),
    )
    .unwrap();

    let metrics = Arc::new(ServiceMetrics::new());
    let app = router(AppState::new(Arc::new(engine), metrics.clone()), body_limit);
    TestApp {
        app,
        classifier,
        metrics,
    }
}

fn confident() -> Vec<f32> {
    vec![0.02, 0.85, 0.04, 0.03, 0.03, 0.02, 0.01]
}

fn unsure() -> Vec<f32> {
    vec![0.10, 0.15, 0.40, 0.05, 0.20, 0.05, 0.05]
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(200, 150, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn jpeg_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 64, Rgb([200, 120, 40]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    multipart_part(field, Some("image.jpg"), data)
}

fn multipart_part(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: {disposition}\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn predict_request(body: Vec<u8>) -> Request {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let ctx = test_app(confident(), false);
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&ctx.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "model_loaded": true}));
}

#[tokio::test]
async fn test_confident_prediction() {
    let ctx = test_app(confident(), false);
    let (status, body) = send(&ctx.app, predict_request(multipart_body("image", &png_bytes()))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "ผัดไทย");
    assert_eq!(body["not_in_database"], false);
    assert!(body.get("message").is_none());
    assert!((body["confidence"].as_f64().unwrap() - 0.85).abs() < 1e-6);

    let ranked = body["all_predictions"].as_array().unwrap();
    assert_eq!(ranked.len(), 5);
    assert_eq!(ranked[0]["class"], "ผัดไทย");
    let confidences: Vec<f64> = ranked
        .iter()
        .map(|c| c["confidence"].as_f64().unwrap())
        .collect();
    assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_below_threshold_is_not_in_database() {
    let ctx = test_app(unsure(), false);
    let (status, body) = send(&ctx.app, predict_request(multipart_body("image", &jpeg_bytes()))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], Value::Null);
    assert_eq!(body["not_in_database"], true);
    assert_eq!(body["message"], "ไม่พบอาหารนี้ในฐานความรู้");
    assert!((body["confidence"].as_f64().unwrap() - 0.40).abs() < 1e-6);
    assert_eq!(body["all_predictions"][0]["class"], "ส้มตำ");
    assert_eq!(body["all_predictions"].as_array().unwrap().len(), 5);
    assert_eq!(ctx.metrics.unknown_predictions.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_missing_image_field() {
    let ctx = test_app(confident(), false);
    let (status, body) = send(&ctx.app, predict_request(multipart_body("photo", &png_bytes()))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image provided"}));
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_text_field_named_image_is_not_a_file() {
    let ctx = test_app(confident(), false);
    let (status, body) = send(
        &ctx.app,
        predict_request(multipart_part("image", None, &png_bytes())),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image provided"}));
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_upload_is_payload_too_large() {
    let ctx = test_app_with_limit(confident(), false, 1024);
    let resp = ctx
        .app
        .clone()
        .oneshot(predict_request(multipart_body("image", &vec![0xAB; 8192])))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.metrics.client_errors.load(Ordering::Relaxed), 1);
    assert_eq!(ctx.metrics.server_errors.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_truncated_multipart_is_client_error() {
    let ctx = test_app(confident(), false);
    let mut body = multipart_body("image", &png_bytes());
    body.truncate(body.len() / 2);

    let (status, body) = send(&ctx.app, predict_request(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(ctx.metrics.server_errors.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_non_multipart_body() {
    let ctx = test_app(confident(), false);
    let req = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&ctx.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image provided"}));
}

#[tokio::test]
async fn test_invalid_image() {
    let ctx = test_app(confident(), false);
    let (status, body) = send(
        &ctx.app,
        predict_request(multipart_body("image", b"this is not an image at all")),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid image file"}));
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.metrics.client_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_inference_failure_is_server_error() {
    let ctx = test_app(confident(), true);
    let (status, body) = send(&ctx.app, predict_request(multipart_body("image", &png_bytes()))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "inference backend unavailable"}));
    assert_eq!(ctx.metrics.server_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_same_image_same_response() {
    let ctx = test_app(confident(), false);
    let image = png_bytes();

    let (_, first) = send(&ctx.app, predict_request(multipart_body("image", &image))).await;
    let (_, second) = send(&ctx.app, predict_request(multipart_body("image", &image))).await;

    assert_eq!(first, second);
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 2);
}
