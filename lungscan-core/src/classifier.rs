//! k-nearest-neighbor classifier
//!
//! Reference samples and their class indices come from the fitted model.
//! Probabilities follow the fitted estimator's semantics:
//! - `uniform`: each of the k neighbors votes 1
//! - `distance`: each neighbor votes `1 / d`; exact matches (d = 0) take all the weight
//!
//! Neighbors at equal distance are ordered by sample index, so results are
//! reproducible.

use serde::Deserialize;
use std::path::Path;

use crate::artifacts::read_json_artifact;
use crate::error::{ArtifactError, PipelineError, Result};
use crate::formatter::{ClassProbabilities, NUM_CLASSES};

/// Neighbor vote weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    #[default]
    Uniform,
    Distance,
}

/// Distance metric
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
    Minkowski,
}

fn default_p() -> f64 {
    2.0
}

/// On-disk classifier layout
#[derive(Debug, Clone, Deserialize)]
pub struct KnnArtifact {
    pub n_neighbors: usize,
    #[serde(default)]
    pub weights: Weighting,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_p")]
    pub p: f64,
    pub classes: Vec<usize>,
    pub samples: Vec<Vec<f32>>,
    pub targets: Vec<usize>,
}

/// Validated, ready-to-use classifier
#[derive(Clone)]
pub struct KnnClassifier {
    n_neighbors: usize,
    weights: Weighting,
    metric: Metric,
    p: f64,
    n_features: usize,
    /// Row-major `n_samples x n_features`
    samples: Vec<f32>,
    targets: Vec<usize>,
}

impl std::fmt::Debug for KnnClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnnClassifier")
            .field("n_neighbors", &self.n_neighbors)
            .field("weights", &self.weights)
            .field("metric", &self.metric)
            .field("p", &self.p)
            .field("n_features", &self.n_features)
            .field("n_samples", &self.targets.len())
            .finish()
    }
}

impl TryFrom<KnnArtifact> for KnnClassifier {
    type Error = String;

    fn try_from(artifact: KnnArtifact) -> std::result::Result<Self, String> {
        if artifact.classes != [0, 1, 2] {
            return Err(format!(
                "classes must be [0, 1, 2], got {:?}",
                artifact.classes
            ));
        }
        if artifact.samples.is_empty() {
            return Err("no reference samples".to_string());
        }
        if artifact.samples.len() != artifact.targets.len() {
            return Err(format!(
                "{} samples but {} targets",
                artifact.samples.len(),
                artifact.targets.len()
            ));
        }
        if artifact.n_neighbors == 0 || artifact.n_neighbors > artifact.samples.len() {
            return Err(format!(
                "n_neighbors must be in 1..={}, got {}",
                artifact.samples.len(),
                artifact.n_neighbors
            ));
        }
        if artifact.metric == Metric::Minkowski && !(artifact.p >= 1.0 && artifact.p.is_finite()) {
            return Err(format!("minkowski p must be >= 1, got {}", artifact.p));
        }
        if let Some(&bad) = artifact.targets.iter().find(|&&t| t >= NUM_CLASSES) {
            return Err(format!("target {} is not a known class", bad));
        }

        let n_features = artifact.samples[0].len();
        if n_features == 0 {
            return Err("samples have no features".to_string());
        }
        let mut samples = Vec::with_capacity(artifact.samples.len() * n_features);
        for (i, row) in artifact.samples.iter().enumerate() {
            if row.len() != n_features {
                return Err(format!(
                    "sample {} has {} features, expected {}",
                    i,
                    row.len(),
                    n_features
                ));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(format!("sample {} contains non-finite values", i));
            }
            samples.extend_from_slice(row);
        }

        Ok(Self {
            n_neighbors: artifact.n_neighbors,
            weights: artifact.weights,
            metric: artifact.metric,
            p: artifact.p,
            n_features,
            samples,
            targets: artifact.targets,
        })
    }
}

impl KnnClassifier {
    pub fn load(path: &Path) -> std::result::Result<Self, ArtifactError> {
        let artifact: KnnArtifact = read_json_artifact("classifier", path)?;
        Self::try_from(artifact).map_err(|reason| ArtifactError::Corrupt {
            name: "classifier",
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn n_samples(&self) -> usize {
        self.targets.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        let diffs = a.iter().zip(b).map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs());
        match self.metric {
            Metric::Euclidean => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            Metric::Manhattan => diffs.sum(),
            Metric::Minkowski if self.p == 1.0 => diffs.sum(),
            Metric::Minkowski if self.p == 2.0 => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            Metric::Minkowski => diffs.map(|d| d.powf(self.p)).sum::<f64>().powf(1.0 / self.p),
        }
    }

    /// Per-class probabilities for one feature vector
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ShapeMismatch`] if `features` has the wrong length
    /// - [`PipelineError::Internal`] if distances are not finite
    pub fn predict_proba(&self, features: &[f32]) -> Result<ClassProbabilities> {
        if features.len() != self.n_features {
            return Err(PipelineError::ShapeMismatch {
                stage: "classifier",
                expected: self.n_features,
                actual: features.len(),
            });
        }

        let mut neighbors: Vec<(f64, usize)> = self
            .samples
            .chunks_exact(self.n_features)
            .enumerate()
            .map(|(i, sample)| (self.distance(features, sample), i))
            .collect();
        if neighbors.iter().any(|(d, _)| d.is_nan()) {
            return Err(PipelineError::Internal(
                "non-finite distance while ranking neighbors".to_string(),
            ));
        }
        neighbors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        neighbors.truncate(self.n_neighbors);

        let mut votes = [0.0f64; NUM_CLASSES];
        match self.weights {
            Weighting::Uniform => {
                for &(_, i) in &neighbors {
                    votes[self.targets[i]] += 1.0;
                }
            }
            Weighting::Distance => {
                let exact = neighbors.iter().any(|(d, _)| *d == 0.0);
                for &(d, i) in &neighbors {
                    let weight = if exact {
                        if d == 0.0 { 1.0 } else { 0.0 }
                    } else {
                        1.0 / d
                    };
                    votes[self.targets[i]] += weight;
                }
            }
        }

        let total: f64 = votes.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(PipelineError::Internal(format!(
                "degenerate neighbor weights (total {})",
                total
            )));
        }
        for v in votes.iter_mut() {
            *v /= total;
        }

        Ok(ClassProbabilities::new(votes))
    }
}
