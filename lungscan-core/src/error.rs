//! Error types for the inference pipeline
//!
//! Two families:
//! - [`PipelineError`]: per-request failures, translated once at the HTTP edge
//! - [`ArtifactError`]: startup failures, fatal to the process

use std::path::PathBuf;
use thiserror::Error;

/// Result type for per-request pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Per-request pipeline errors
///
/// Closed set. Only [`PipelineError::Validation`] is the caller's fault;
/// every other variant indicates an operator-actionable problem.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Input bytes are not a decodable image
    #[error("Validation error: {0}")]
    Validation(String),

    /// Vector length does not match what an artifact expects
    #[error("Shape mismatch in {stage}: expected {expected}, got {actual}")]
    ShapeMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Extractor rejected its input or failed during inference
    #[error("Feature extraction error ({extractor}): {message} [input shape {shape:?}]")]
    FeatureExtraction {
        extractor: String,
        message: String,
        shape: Vec<usize>,
    },

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// True when the request itself was malformed
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}

/// Startup errors while loading or cross-checking artifacts
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Artifact file does not exist
    #[error("Artifact '{name}' not found at {path}")]
    Missing { name: &'static str, path: PathBuf },

    /// Artifact file exists but could not be read
    #[error("Failed to read artifact '{name}' at {path}: {source}")]
    Io {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact content is malformed or violates its own constraints
    #[error("Artifact '{name}' at {path} is corrupt: {reason}")]
    Corrupt {
        name: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Artifacts load individually but disagree with each other
    #[error("Artifacts are inconsistent: {0}")]
    Inconsistent(String),

    /// Artifact kind cannot be handled by this build
    #[error("Unsupported artifact: {0}")]
    Unsupported(String),
}
