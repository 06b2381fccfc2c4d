//! Test Helper Utilities
//!
//! Shared utilities for testing lungscan-api: deterministic extractors so
//! the pipeline runs without ONNX models, plus multipart request builders.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use lungscan_api::{build_router, AppState};
use lungscan_core::artifacts::ImageSize;
use lungscan_core::classifier::{KnnArtifact, KnnClassifier, Metric, Weighting};
use lungscan_core::selector::FeatureSelector;
use lungscan_core::{
    ArtifactStore, FeatureExtractor, InferenceContext, NormalizationParams, PipelineError,
    TensorLayout,
};
use ndarray::ArrayView4;
use serde_json::Value;

pub const TEST_API_KEY: &str = "test-api-key";
pub const BOUNDARY: &str = "lungscan-test-boundary";
pub const SIZE: usize = 8;

// =============================================================================
// Extractors
// =============================================================================

/// Per-channel mean, for either layout
pub struct ChannelMeanExtractor {
    layout: TensorLayout,
    calls: Arc<AtomicUsize>,
}

impl ChannelMeanExtractor {
    pub fn new(layout: TensorLayout, calls: Arc<AtomicUsize>) -> Self {
        Self { layout, calls }
    }
}

impl FeatureExtractor for ChannelMeanExtractor {
    fn name(&self) -> &str {
        "channel_mean"
    }
    fn layout(&self) -> TensorLayout {
        self.layout
    }
    fn input_shape(&self) -> [usize; 4] {
        self.layout.shape(SIZE, SIZE)
    }
    fn output_len(&self) -> usize {
        3
    }
    fn forward(&self, input: ArrayView4<'_, f32>) -> lungscan_core::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = (SIZE * SIZE) as f32;
        let out = (0..3)
            .map(|c| {
                let sum: f32 = match self.layout {
                    TensorLayout::ChannelsFirst => {
                        input.index_axis(ndarray::Axis(1), c).iter().sum()
                    }
                    TensorLayout::ChannelsLast => {
                        input.index_axis(ndarray::Axis(3), c).iter().sum()
                    }
                };
                sum / n
            })
            .collect();
        Ok(out)
    }
}

/// Fails every forward pass with an internal error
pub struct FailingExtractor;

impl FeatureExtractor for FailingExtractor {
    fn name(&self) -> &str {
        "failing"
    }
    fn layout(&self) -> TensorLayout {
        TensorLayout::ChannelsFirst
    }
    fn input_shape(&self) -> [usize; 4] {
        TensorLayout::ChannelsFirst.shape(SIZE, SIZE)
    }
    fn output_len(&self) -> usize {
        3
    }
    fn forward(&self, _input: ArrayView4<'_, f32>) -> lungscan_core::Result<Vec<f32>> {
        Err(PipelineError::Internal(
            "session exploded at node conv5 with tensor [1, 3, 8, 8]".to_string(),
        ))
    }
}

// =============================================================================
// Context
// =============================================================================

fn params() -> NormalizationParams {
    NormalizationParams {
        image_size: ImageSize::Square(SIZE as u32),
        means: [0.5, 0.5, 0.5],
        stds: [0.25, 0.25, 0.25],
    }
}

/// Combined vector is [secondary (3) | primary (3)]; keep four columns
fn selector() -> FeatureSelector {
    FeatureSelector::mask(6, vec![0, 1, 3, 4]).unwrap()
}

/// Dark images land near Normal, mid-gray near Benign, bright near Malignant
fn classifier() -> KnnClassifier {
    KnnClassifier::try_from(KnnArtifact {
        n_neighbors: 3,
        weights: Weighting::Distance,
        metric: Metric::Euclidean,
        p: 2.0,
        classes: vec![0, 1, 2],
        samples: vec![
            vec![-1.8, -1.8, -1.8, -1.8],
            vec![-1.4, -1.5, -1.4, -1.5],
            vec![0.0, 0.1, 0.0, 0.1],
            vec![-0.1, 0.0, -0.1, 0.0],
            vec![1.8, 1.8, 1.8, 1.8],
            vec![1.5, 1.4, 1.5, 1.4],
        ],
        targets: vec![0, 0, 1, 1, 2, 2],
    })
    .unwrap()
}

/// Context whose extractors count forward passes
pub fn counting_context() -> (Arc<InferenceContext>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = ArtifactStore::from_parts(
        params(),
        Box::new(ChannelMeanExtractor::new(TensorLayout::ChannelsFirst, calls.clone())),
        Box::new(ChannelMeanExtractor::new(TensorLayout::ChannelsLast, calls.clone())),
        selector(),
        classifier(),
    );
    let context = InferenceContext::new(store).expect("consistent test artifacts");
    (Arc::new(context), calls)
}

pub fn test_context() -> Arc<InferenceContext> {
    counting_context().0
}

/// Context whose primary extractor always fails
pub fn failing_context() -> Arc<InferenceContext> {
    let store = ArtifactStore::from_parts(
        params(),
        Box::new(FailingExtractor),
        Box::new(ChannelMeanExtractor::new(
            TensorLayout::ChannelsLast,
            Arc::new(AtomicUsize::new(0)),
        )),
        selector(),
        classifier(),
    );
    Arc::new(InferenceContext::new(store).expect("consistent test artifacts"))
}

pub fn setup_app(context: Arc<InferenceContext>) -> axum::Router {
    build_router(AppState::new(context, TEST_API_KEY, 20 * 1024 * 1024))
}

pub fn setup_app_with_limit(context: Arc<InferenceContext>, max_upload_bytes: usize) -> axum::Router {
    build_router(AppState::new(context, TEST_API_KEY, max_upload_bytes))
}

// =============================================================================
// Images
// =============================================================================

pub fn encode_rgb(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(24, 24, |x, y| {
        let shade = ((x * 3 + y) % 5) as u8;
        Rgb([
            color[0].saturating_add(shade),
            color[1].saturating_add(shade),
            color[2].saturating_add(shade),
        ])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn encode_gray(format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(30, 18, |x, y| Luma([((x + y) * 5) as u8]));
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

// =============================================================================
// Requests
// =============================================================================

/// Single-part multipart body
pub fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn predict_request(api_key: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Authenticated upload of `data` as field `file`
pub fn image_request(file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    predict_request(
        Some(TEST_API_KEY),
        multipart_body("file", file_name, content_type, data),
    )
}

pub fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
