//! Model artifact store
//!
//! Loads the five pretrained artifacts once at startup:
//! - primary extractor (channel-first backbone)
//! - secondary extractor (channel-last backbone)
//! - feature selector
//! - k-NN classifier
//! - normalization parameters
//!
//! Any missing, unreadable or malformed artifact is a fatal [`ArtifactError`].
//! Nothing here can be mutated after loading.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::classifier::KnnClassifier;
use crate::error::ArtifactError;
use crate::extractor::{ExtractorOptions, FeatureExtractor};
use crate::selector::FeatureSelector;

// ========================================
// Paths
// ========================================

/// Default file names inside a models directory
pub const PRIMARY_EXTRACTOR_FILE: &str = "alexnet_features.onnx";
pub const SECONDARY_EXTRACTOR_FILE: &str = "vgg16_features.onnx";
pub const SELECTOR_FILE: &str = "lasso_selector.json";
pub const CLASSIFIER_FILE: &str = "knn_model.json";
pub const NORMALIZATION_FILE: &str = "preprocessing_params.json";

/// Locations of the five artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub primary_extractor: PathBuf,
    pub secondary_extractor: PathBuf,
    pub selector: PathBuf,
    pub classifier: PathBuf,
    pub normalization: PathBuf,
}

impl ArtifactPaths {
    /// Default file names under `dir`
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            primary_extractor: dir.join(PRIMARY_EXTRACTOR_FILE),
            secondary_extractor: dir.join(SECONDARY_EXTRACTOR_FILE),
            selector: dir.join(SELECTOR_FILE),
            classifier: dir.join(CLASSIFIER_FILE),
            normalization: dir.join(NORMALIZATION_FILE),
        }
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self::under("models")
    }
}

// ========================================
// Normalization parameters
// ========================================

/// Target spatial size: a square side or `[height, width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(u32),
    Dims([u32; 2]),
}

/// Stored preprocessing parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NormalizationParams {
    pub image_size: ImageSize,
    pub means: [f32; 3],
    pub stds: [f32; 3],
}

impl NormalizationParams {
    /// `(height, width)`
    pub fn dimensions(&self) -> (u32, u32) {
        match self.image_size {
            ImageSize::Square(side) => (side, side),
            ImageSize::Dims([h, w]) => (h, w),
        }
    }

    /// Check internal constraints
    pub fn validate(&self) -> Result<(), String> {
        let (h, w) = self.dimensions();
        if h == 0 || w == 0 {
            return Err(format!("image_size must be positive, got {}x{}", h, w));
        }
        if self.means.iter().any(|m| !m.is_finite()) {
            return Err("means must be finite".to_string());
        }
        if self.stds.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!("stds must be finite and positive, got {:?}", self.stds));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let params: Self = read_json_artifact("normalization", path)?;
        params.validate().map_err(|reason| ArtifactError::Corrupt {
            name: "normalization",
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(params)
    }
}

/// Read and deserialize a JSON artifact
pub(crate) fn read_json_artifact<T: DeserializeOwned>(
    name: &'static str,
    path: &Path,
) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            name,
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
        name,
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Corrupt {
        name,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// ========================================
// Store
// ========================================

/// Read-only collection of loaded artifacts
pub struct ArtifactStore {
    normalization: NormalizationParams,
    primary: Box<dyn FeatureExtractor>,
    secondary: Box<dyn FeatureExtractor>,
    selector: FeatureSelector,
    classifier: KnnClassifier,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("normalization", &self.normalization)
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .field("selector", &self.selector)
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl ArtifactStore {
    /// Load every artifact from disk
    ///
    /// Normalization parameters are loaded first because they fix the
    /// extractor input shapes.
    pub fn load(paths: &ArtifactPaths, options: &ExtractorOptions) -> Result<Self, ArtifactError> {
        let normalization = NormalizationParams::load(&paths.normalization)?;
        let (height, width) = normalization.dimensions();
        info!(
            path = %paths.normalization.display(),
            height,
            width,
            "Loaded normalization parameters"
        );

        let (primary, secondary) = load_extractors(paths, options, height as usize, width as usize)?;

        let selector = FeatureSelector::load(&paths.selector)?;
        info!(
            path = %paths.selector.display(),
            n_features_in = selector.n_features_in(),
            n_features_out = selector.n_features_out(),
            "Loaded feature selector"
        );

        let classifier = KnnClassifier::load(&paths.classifier)?;
        info!(
            path = %paths.classifier.display(),
            n_neighbors = classifier.n_neighbors(),
            n_samples = classifier.n_samples(),
            n_features = classifier.n_features(),
            "Loaded classifier"
        );

        Ok(Self::from_parts(normalization, primary, secondary, selector, classifier))
    }

    /// Assemble a store from already-loaded parts
    pub fn from_parts(
        normalization: NormalizationParams,
        primary: Box<dyn FeatureExtractor>,
        secondary: Box<dyn FeatureExtractor>,
        selector: FeatureSelector,
        classifier: KnnClassifier,
    ) -> Self {
        Self {
            normalization,
            primary,
            secondary,
            selector,
            classifier,
        }
    }

    pub fn normalization(&self) -> &NormalizationParams {
        &self.normalization
    }

    pub fn primary_extractor(&self) -> &dyn FeatureExtractor {
        self.primary.as_ref()
    }

    pub fn secondary_extractor(&self) -> &dyn FeatureExtractor {
        self.secondary.as_ref()
    }

    pub fn selector(&self) -> &FeatureSelector {
        &self.selector
    }

    pub fn classifier(&self) -> &KnnClassifier {
        &self.classifier
    }

    /// Cross-check dimensions between artifacts
    ///
    /// Every mismatch found here would otherwise surface on each request.
    pub fn verify_consistency(&self) -> Result<(), ArtifactError> {
        let (height, width) = self.normalization.dimensions();
        for extractor in [self.primary_extractor(), self.secondary_extractor()] {
            let expected = extractor.layout().shape(height as usize, width as usize);
            if extractor.input_shape() != expected {
                return Err(ArtifactError::Inconsistent(format!(
                    "extractor '{}' expects input {:?} but normalization produces {:?}",
                    extractor.name(),
                    extractor.input_shape(),
                    expected
                )));
            }
            if extractor.output_len() == 0 {
                return Err(ArtifactError::Inconsistent(format!(
                    "extractor '{}' produces no features",
                    extractor.name()
                )));
            }
        }

        let combined = self.primary.output_len() + self.secondary.output_len();
        if combined != self.selector.n_features_in() {
            return Err(ArtifactError::Inconsistent(format!(
                "extractors produce {} combined features ({} secondary + {} primary) but selector expects {}",
                combined,
                self.secondary.output_len(),
                self.primary.output_len(),
                self.selector.n_features_in()
            )));
        }

        if self.selector.n_features_out() != self.classifier.n_features() {
            return Err(ArtifactError::Inconsistent(format!(
                "selector produces {} features but classifier expects {}",
                self.selector.n_features_out(),
                self.classifier.n_features()
            )));
        }

        Ok(())
    }
}

#[cfg(feature = "onnx")]
fn load_extractors(
    paths: &ArtifactPaths,
    options: &ExtractorOptions,
    height: usize,
    width: usize,
) -> Result<(Box<dyn FeatureExtractor>, Box<dyn FeatureExtractor>), ArtifactError> {
    use crate::extractor::onnx::OnnxExtractor;
    use crate::extractor::{InputConvention, TensorLayout};

    let primary = OnnxExtractor::load(
        "primary_extractor",
        &paths.primary_extractor,
        TensorLayout::ChannelsFirst,
        InputConvention::Identity,
        TensorLayout::ChannelsFirst.shape(height, width),
        options.intra_threads,
    )?;
    let secondary = OnnxExtractor::load(
        "secondary_extractor",
        &paths.secondary_extractor,
        TensorLayout::ChannelsLast,
        options.secondary_convention,
        TensorLayout::ChannelsLast.shape(height, width),
        options.intra_threads,
    )?;
    Ok((Box::new(primary), Box::new(secondary)))
}

#[cfg(not(feature = "onnx"))]
fn load_extractors(
    _paths: &ArtifactPaths,
    _options: &ExtractorOptions,
    _height: usize,
    _width: usize,
) -> Result<(Box<dyn FeatureExtractor>, Box<dyn FeatureExtractor>), ArtifactError> {
    Err(ArtifactError::Unsupported(
        "ONNX extractors require the `onnx` feature".to_string(),
    ))
}
