//! Inference context and prediction pipeline
//!
//! Normalizer -> dual extractor -> fusion/selector -> classifier -> formatter,
//! executed synchronously per call.
//!
//! [`InferenceContext`] is built once at startup and shared read-only
//! (typically behind an `Arc`) by every request.

use ndarray::ArrayView4;
use tracing::debug;

use crate::artifacts::{ArtifactPaths, ArtifactStore};
use crate::error::{ArtifactError, Result};
use crate::extractor::{DualFeatureExtractor, ExtractorOptions};
use crate::formatter::{format_prediction, Prediction};
use crate::normalizer::ImageNormalizer;

/// Immutable bundle of everything a prediction needs
#[derive(Debug)]
pub struct InferenceContext {
    store: ArtifactStore,
    normalizer: ImageNormalizer,
}

impl InferenceContext {
    /// Wrap a loaded store after checking that its artifacts fit together
    pub fn new(store: ArtifactStore) -> std::result::Result<Self, ArtifactError> {
        store.verify_consistency()?;
        let normalizer = ImageNormalizer::new(store.normalization());
        Ok(Self { store, normalizer })
    }

    /// Load all artifacts and build the context
    pub fn load(
        paths: &ArtifactPaths,
        options: &ExtractorOptions,
    ) -> std::result::Result<Self, ArtifactError> {
        Self::new(ArtifactStore::load(paths, options)?)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn normalizer(&self) -> &ImageNormalizer {
        &self.normalizer
    }

    pub fn dual_extractor(&self) -> DualFeatureExtractor<'_> {
        DualFeatureExtractor::new(
            self.store.primary_extractor(),
            self.store.secondary_extractor(),
        )
    }

    /// Combined (fused) feature vector for a normalized tensor
    pub fn extract_features(&self, tensor: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
        self.dual_extractor().extract(tensor)
    }

    /// Selected feature vector for a normalized tensor
    pub fn select_features(&self, tensor: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
        let combined = self.extract_features(tensor)?;
        debug!(combined_len = combined.len(), "Fused feature vectors");
        self.store.selector().transform(&combined)
    }

    /// Run the full pipeline on encoded image bytes
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction> {
        let tensor = self.normalizer.normalize(image_bytes)?;
        let selected = self.select_features(tensor.view())?;
        debug!(selected_len = selected.len(), "Selected features");

        let probabilities = self.store.classifier().predict_proba(&selected)?;
        let prediction = format_prediction(probabilities);
        debug!(
            prediction = %prediction.prediction,
            confidence = prediction.confidence,
            "Classified image"
        );
        Ok(prediction)
    }
}
