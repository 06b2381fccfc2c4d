//! ONNX model loading and inference via the `ort` crate.

use std::path::Path;
use std::sync::Mutex;

use ndarray::{Array4, ArrayView4};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use super::{FeatureExtractor, InputConvention, TensorLayout};
use crate::error::{ArtifactError, PipelineError, Result};

/// Feature extractor backed by an ONNX graph
///
/// The session is locked per call, so concurrent requests sharing one
/// extractor run one forward pass at a time.
pub struct OnnxExtractor {
    name: &'static str,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    layout: TensorLayout,
    convention: InputConvention,
    input_shape: [usize; 4],
    output_len: usize,
}

impl OnnxExtractor {
    /// Load an ONNX model and measure its output length
    ///
    /// Loading runs one warm-up forward pass on a zero tensor of `input_shape`, so a
    /// graph that cannot accept that shape fails here rather than per request.
    pub fn load(
        name: &'static str,
        path: &Path,
        layout: TensorLayout,
        convention: InputConvention,
        input_shape: [usize; 4],
        intra_threads: usize,
    ) -> std::result::Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::Missing {
                name,
                path: path.to_path_buf(),
            });
        }

        let corrupt = |reason: String| ArtifactError::Corrupt {
            name,
            path: path.to_path_buf(),
            reason,
        };

        let session = Session::builder()
            .map_err(|e| corrupt(e.to_string()))?
            .with_intra_threads(intra_threads)
            .map_err(|e| corrupt(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| corrupt(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| corrupt("graph declares no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| corrupt("graph declares no outputs".to_string()))?;

        let mut extractor = Self {
            name,
            session: Mutex::new(session),
            input_name,
            output_name,
            layout,
            convention,
            input_shape,
            output_len: 0,
        };

        let warmup = Array4::<f32>::zeros(input_shape);
        let features = extractor
            .run(warmup.view())
            .map_err(|e| corrupt(format!("warm-up inference failed: {}", e)))?;
        if features.is_empty() {
            return Err(corrupt("graph produced an empty feature map".to_string()));
        }
        extractor.output_len = features.len();

        info!(
            extractor = name,
            path = %path.display(),
            input = %extractor.input_name,
            output = %extractor.output_name,
            input_shape = ?input_shape,
            output_len = extractor.output_len,
            "Loaded ONNX feature extractor"
        );

        Ok(extractor)
    }

    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
        let failure = |message: String| PipelineError::FeatureExtraction {
            extractor: self.name.to_string(),
            message,
            shape: input.shape().to_vec(),
        };

        let input = input.as_standard_layout().into_owned();
        let input_tensor = TensorRef::from_array_view(&input).map_err(|e| failure(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| PipelineError::Internal(format!("lock error: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| failure(e.to_string()))?;

        let output_array = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| failure(e.to_string()))?;
        debug!(extractor = self.name, output_shape = ?output_array.shape(), "Forward pass complete");

        Ok(output_array.iter().copied().collect())
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn name(&self) -> &str {
        self.name
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn convention(&self) -> InputConvention {
        self.convention
    }

    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>> {
        self.run(input)
    }
}
