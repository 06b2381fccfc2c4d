//! Error types for lungscan-api
//!
//! Every error body has the shape `{"error": <string>, "details": <string|null>}`.
//! Internal failures never carry their cause to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lungscan_core::PipelineError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or mismatched API key (403)
    #[error("Invalid API key")]
    Forbidden,

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured size cap (413)
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Well-formed request missing a required part (422)
    #[error("Unprocessable request: {0}")]
    UnprocessableEntity(String),

    /// Uploaded bytes are not a decodable image (400)
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::InvalidImage(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match self {
            ApiError::Forbidden => ("Invalid API key".to_string(), None),
            ApiError::BadRequest(msg) => (msg, None),
            ApiError::PayloadTooLarge(msg) => ("File too large".to_string(), Some(msg)),
            ApiError::UnprocessableEntity(msg) => (msg, None),
            ApiError::InvalidImage(msg) => ("Invalid image".to_string(), Some(msg)),
            ApiError::Internal(_) => ("Internal server error".to_string(), None),
        };

        let body = Json(json!({
            "error": error,
            "details": details,
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
