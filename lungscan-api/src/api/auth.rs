//! API key middleware
//!
//! Applied to protected routes only. Rejects with 403 before the request
//! body is touched, so no pipeline work happens for unauthenticated calls.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if state.api_key_matches(key) => Ok(next.run(request).await),
        Some(_) => {
            warn!(uri = %request.uri(), "Rejected request: invalid API key");
            Err(ApiError::Forbidden)
        }
        None => {
            warn!(uri = %request.uri(), "Rejected request: missing API key");
            Err(ApiError::Forbidden)
        }
    }
}
