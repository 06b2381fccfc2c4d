//! lungscan-api library - HTTP front end for the lung CT classifier
//!
//! Exposes the prediction pipeline from `lungscan-core` over HTTP:
//! - `GET /` and `GET /health` (no auth)
//! - `POST /api/v1/predict` (requires `X-API-Key`)

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use lungscan_core::InferenceContext;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Loaded artifacts, read-only for the life of the process
    pub context: Arc<InferenceContext>,
    /// SHA-256 of the configured API key
    api_key_digest: [u8; 32],
    /// Service start time, reported by /health
    pub startup_time: DateTime<Utc>,
    /// Request body cap for uploads
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(context: Arc<InferenceContext>, api_key: &str, max_upload_bytes: usize) -> Self {
        Self {
            context,
            api_key_digest: Sha256::digest(api_key.as_bytes()).into(),
            startup_time: Utc::now(),
            max_upload_bytes,
        }
    }

    /// Compare a presented key against the configured one
    ///
    /// Both sides are hashed so the comparison always covers 32 bytes
    /// regardless of the presented key's length.
    pub fn api_key_matches(&self, presented: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        presented
            .iter()
            .zip(self.api_key_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Build application router
///
/// Protected routes sit behind the API key middleware, which runs before
/// any request body is read.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/api/v1/predict", post(api::predict))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .route("/", get(api::root))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
