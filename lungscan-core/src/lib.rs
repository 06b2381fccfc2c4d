//! # LungScan Core Library
//!
//! Inference pipeline for lung CT scan classification:
//! - Artifact loading and startup consistency checks
//! - Image normalization into a fixed-size tensor
//! - Dual feature extraction (two frozen convolutional backbones)
//! - Feature fusion and linear feature selection
//! - k-nearest-neighbor classification
//! - Result formatting
//!
//! Every stage consumes an already-trained artifact. Nothing in this crate
//! mutates state after [`InferenceContext`] construction.

pub mod artifacts;
pub mod classifier;
pub mod error;
pub mod extractor;
pub mod formatter;
pub mod normalizer;
pub mod pipeline;
pub mod selector;

pub use artifacts::{ArtifactPaths, ArtifactStore, NormalizationParams};
pub use error::{ArtifactError, PipelineError, Result};
pub use extractor::{ExtractorOptions, FeatureExtractor, InputConvention, TensorLayout};
pub use formatter::{ClassProbabilities, Label, Prediction};
pub use pipeline::InferenceContext;
