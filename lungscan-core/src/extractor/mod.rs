//! Dual feature extraction
//!
//! Two frozen convolutional backbones each turn the normalized image tensor
//! into a flat feature vector:
//! - **Primary** (A): consumes the channel-first tensor as-is
//! - **Secondary** (B): consumes a channel-last tensor with its own input convention
//!
//! The two vectors are fused in [`FUSION_ORDER`]: secondary first, then
//! primary. The selector artifact was fitted on exactly this concatenation;
//! the order cannot be recovered from the artifact, so swapping it yields
//! wrong predictions without any error.

#[cfg(feature = "onnx")]
pub mod onnx;

use ndarray::{Array4, ArrayView4, Axis};
use serde::Deserialize;
use std::fmt;
use tracing::error;

use crate::error::{PipelineError, Result};

/// Memory layout an extractor expects for its batch-of-one input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `(1, C, H, W)`
    ChannelsFirst,
    /// `(1, H, W, C)`
    ChannelsLast,
}

impl TensorLayout {
    /// Batch-of-one shape for an image of `height` x `width` with 3 channels
    pub fn shape(self, height: usize, width: usize) -> [usize; 4] {
        match self {
            TensorLayout::ChannelsFirst => [1, 3, height, width],
            TensorLayout::ChannelsLast => [1, height, width, 3],
        }
    }

    fn channel_axis(self) -> Axis {
        match self {
            TensorLayout::ChannelsFirst => Axis(1),
            TensorLayout::ChannelsLast => Axis(3),
        }
    }
}

/// Extra input transform an extractor applies on top of the shared normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputConvention {
    /// Pass the tensor through unchanged
    #[default]
    Identity,
    /// RGB -> BGR, then subtract the ImageNet BGR channel means
    Caffe,
}

/// ImageNet channel means in BGR order, as used by Caffe-style backbones
pub const CAFFE_BGR_MEANS: [f32; 3] = [103.939, 116.779, 123.68];

impl InputConvention {
    /// Apply the convention in place; `layout` locates the channel axis
    pub fn apply(self, tensor: &mut Array4<f32>, layout: TensorLayout) {
        match self {
            InputConvention::Identity => {}
            InputConvention::Caffe => {
                let axis = layout.channel_axis();
                tensor.invert_axis(axis);
                let reordered = tensor.as_standard_layout().into_owned();
                *tensor = reordered;
                for (c, mut channel) in tensor.axis_iter_mut(axis).enumerate() {
                    let mean = CAFFE_BGR_MEANS[c];
                    channel.mapv_inplace(|v| v - mean);
                }
            }
        }
    }
}

impl fmt::Display for InputConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputConvention::Identity => f.write_str("identity"),
            InputConvention::Caffe => f.write_str("caffe"),
        }
    }
}

/// Options controlling how extractor artifacts are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorOptions {
    /// Threads used inside a single inference call
    pub intra_threads: usize,
    /// Input convention for the secondary extractor
    pub secondary_convention: InputConvention,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            secondary_convention: InputConvention::Caffe,
        }
    }
}

/// A frozen feature extractor
///
/// Implementations run forward inference only. `forward` receives a tensor
/// already in [`FeatureExtractor::layout`] with the extractor's
/// [`FeatureExtractor::convention`] applied, and must return exactly
/// [`FeatureExtractor::output_len`] values.
pub trait FeatureExtractor: Send + Sync {
    /// Name for logs and error messages
    fn name(&self) -> &str;

    /// Expected input layout
    fn layout(&self) -> TensorLayout;

    /// Input convention applied after layout conversion
    fn convention(&self) -> InputConvention {
        InputConvention::Identity
    }

    /// Expected input shape, in [`FeatureExtractor::layout`]
    fn input_shape(&self) -> [usize; 4];

    /// Length of the flat output vector
    fn output_len(&self) -> usize;

    /// Forward pass producing the flattened feature map
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>>;
}

/// Which extractor output occupies which slot of the combined vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionSlot {
    Secondary,
    Primary,
}

/// Concatenation order of the combined feature vector
pub const FUSION_ORDER: [FusionSlot; 2] = [FusionSlot::Secondary, FusionSlot::Primary];

/// Concatenate extractor outputs in [`FUSION_ORDER`]
pub fn fuse(primary: &[f32], secondary: &[f32]) -> Vec<f32> {
    let mut combined = Vec::with_capacity(primary.len() + secondary.len());
    for slot in FUSION_ORDER {
        match slot {
            FusionSlot::Secondary => combined.extend_from_slice(secondary),
            FusionSlot::Primary => combined.extend_from_slice(primary),
        }
    }
    combined
}

/// Convert a channel-first tensor into `layout` and apply `convention`
///
/// This is a layout translation only; the shared per-channel normalization
/// already present in `tensor` is left as-is.
pub fn prepare_input(
    tensor: ArrayView4<'_, f32>,
    layout: TensorLayout,
    convention: InputConvention,
) -> Array4<f32> {
    let mut prepared = match layout {
        TensorLayout::ChannelsFirst => tensor.as_standard_layout().into_owned(),
        TensorLayout::ChannelsLast => tensor
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .into_owned(),
    };
    convention.apply(&mut prepared, layout);
    prepared
}

/// Run one extractor with input and output shape checks
fn run_extractor(extractor: &dyn FeatureExtractor, input: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
    let expected = extractor.input_shape();
    if input.shape() != &expected[..] {
        return Err(PipelineError::FeatureExtraction {
            extractor: extractor.name().to_string(),
            message: format!("expected input shape {:?}", expected),
            shape: input.shape().to_vec(),
        });
    }

    let features = extractor.forward(input.view())?;

    if features.len() != extractor.output_len() {
        return Err(PipelineError::FeatureExtraction {
            extractor: extractor.name().to_string(),
            message: format!(
                "produced {} features, expected {}",
                features.len(),
                extractor.output_len()
            ),
            shape: input.shape().to_vec(),
        });
    }

    Ok(features)
}

/// Runs both extractors and fuses their outputs
pub struct DualFeatureExtractor<'a> {
    primary: &'a dyn FeatureExtractor,
    secondary: &'a dyn FeatureExtractor,
}

impl<'a> DualFeatureExtractor<'a> {
    pub fn new(primary: &'a dyn FeatureExtractor, secondary: &'a dyn FeatureExtractor) -> Self {
        Self { primary, secondary }
    }

    /// Length of the fused vector
    pub fn combined_len(&self) -> usize {
        self.primary.output_len() + self.secondary.output_len()
    }

    /// Extract both feature vectors from a `(1, 3, H, W)` tensor
    ///
    /// Returns `(primary, secondary)`.
    pub fn extract_pair(&self, tensor: ArrayView4<'_, f32>) -> Result<(Vec<f32>, Vec<f32>)> {
        let primary = self.extract_one(self.primary, tensor)?;
        let secondary = self.extract_one(self.secondary, tensor)?;
        Ok((primary, secondary))
    }

    /// Extract and fuse into the combined feature vector
    pub fn extract(&self, tensor: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
        let (primary, secondary) = self.extract_pair(tensor)?;
        Ok(fuse(&primary, &secondary))
    }

    fn extract_one(
        &self,
        extractor: &dyn FeatureExtractor,
        tensor: ArrayView4<'_, f32>,
    ) -> Result<Vec<f32>> {
        let input = prepare_input(tensor, extractor.layout(), extractor.convention());
        run_extractor(extractor, input.view()).map_err(|e| {
            error!(
                extractor = extractor.name(),
                shape = ?tensor.shape(),
                "Feature extraction failed: {}",
                e
            );
            e
        })
    }
}
