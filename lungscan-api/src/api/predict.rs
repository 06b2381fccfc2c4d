//! Prediction endpoint
//!
//! POST /api/v1/predict with a multipart `file` field. The pipeline is
//! CPU-bound and runs on the blocking pool.

use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        State,
    },
    http::StatusCode,
    Json,
};
use lungscan_core::Prediction;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Multipart field holding the image
pub const FILE_FIELD: &str = "file";

/// The uploaded image part
#[derive(Debug)]
struct Upload {
    file_name: String,
    bytes: Bytes,
}

/// POST /api/v1/predict
pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Prediction>> {
    let request_id = Uuid::new_v4();
    let span = info_span!("predict", %request_id);

    async move {
        let mut multipart = multipart.map_err(|rejection| {
            ApiError::BadRequest(format!("Invalid multipart body: {}", rejection.body_text()))
        })?;
        let upload = read_upload(&mut multipart).await?;
        debug!(file = %upload.file_name, bytes = upload.bytes.len(), "Received upload");

        let context = state.context.clone();
        let bytes = upload.bytes;
        let result = tokio::task::spawn_blocking(move || context.predict(&bytes))
            .await
            .map_err(|e| {
                error!("Prediction task failed: {}", e);
                ApiError::Internal(e.to_string())
            })?;

        match result {
            Ok(prediction) => {
                info!(
                    prediction = %prediction.prediction,
                    confidence = prediction.confidence,
                    "Successful prediction for file: {}",
                    upload.file_name
                );
                Ok(Json(prediction))
            }
            Err(e) if e.is_client_error() => {
                warn!("Rejected file {}: {}", upload.file_name, e);
                Err(e.into())
            }
            Err(e) => {
                error!("Prediction error for file {}: {:?}", upload.file_name, e);
                Err(e.into())
            }
        }
    }
    .instrument(span)
    .await
}

/// Find the `file` field, checking its declared content type before reading it
async fn read_upload(multipart: &mut Multipart) -> ApiResult<Upload> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let is_image = field
            .content_type()
            .is_some_and(|content_type| content_type.starts_with("image/"));
        if !is_image {
            return Err(ApiError::BadRequest("File must be an image".to_string()));
        }

        let file_name = field.file_name().unwrap_or("<unnamed>").to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Upload { file_name, bytes });
    }

    Err(ApiError::UnprocessableEntity("Missing file field".to_string()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}
