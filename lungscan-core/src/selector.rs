//! Feature selection
//!
//! Pretrained linear reduction of the combined feature vector. Two artifact
//! kinds are accepted:
//! - `mask`: keep a fixed set of columns (what a fitted Lasso selector does)
//! - `projection`: dense `W x + b`

use serde::Deserialize;
use std::path::Path;

use crate::artifacts::read_json_artifact;
use crate::error::{ArtifactError, PipelineError, Result};

/// Loaded feature selector
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeatureSelector {
    Mask {
        n_features_in: usize,
        support: Vec<usize>,
    },
    Projection {
        n_features_in: usize,
        weights: Vec<Vec<f32>>,
        #[serde(default)]
        offset: Option<Vec<f32>>,
    },
}

impl FeatureSelector {
    /// Column-mask selector
    pub fn mask(n_features_in: usize, support: Vec<usize>) -> std::result::Result<Self, String> {
        let selector = FeatureSelector::Mask {
            n_features_in,
            support,
        };
        selector.validate()?;
        Ok(selector)
    }

    /// Dense projection selector
    pub fn projection(
        n_features_in: usize,
        weights: Vec<Vec<f32>>,
        offset: Option<Vec<f32>>,
    ) -> std::result::Result<Self, String> {
        let selector = FeatureSelector::Projection {
            n_features_in,
            weights,
            offset,
        };
        selector.validate()?;
        Ok(selector)
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ArtifactError> {
        let selector: Self = read_json_artifact("selector", path)?;
        selector.validate().map_err(|reason| ArtifactError::Corrupt {
            name: "selector",
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(selector)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            FeatureSelector::Mask {
                n_features_in,
                support,
            } => {
                if support.is_empty() {
                    return Err("support is empty".to_string());
                }
                if support.windows(2).any(|w| w[0] >= w[1]) {
                    return Err("support indices must be strictly increasing".to_string());
                }
                if let Some(&last) = support.last() {
                    if last >= *n_features_in {
                        return Err(format!(
                            "support index {} out of range for {} input features",
                            last, n_features_in
                        ));
                    }
                }
            }
            FeatureSelector::Projection {
                n_features_in,
                weights,
                offset,
            } => {
                if weights.is_empty() {
                    return Err("projection has no rows".to_string());
                }
                if let Some((row, w)) = weights.iter().enumerate().find(|(_, w)| w.len() != *n_features_in) {
                    return Err(format!(
                        "projection row {} has {} columns, expected {}",
                        row,
                        w.len(),
                        n_features_in
                    ));
                }
                if weights.iter().flatten().any(|v| !v.is_finite()) {
                    return Err("projection weights must be finite".to_string());
                }
                if let Some(offset) = offset {
                    if offset.len() != weights.len() {
                        return Err(format!(
                            "offset has {} entries, expected {}",
                            offset.len(),
                            weights.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn n_features_in(&self) -> usize {
        match self {
            FeatureSelector::Mask { n_features_in, .. } => *n_features_in,
            FeatureSelector::Projection { n_features_in, .. } => *n_features_in,
        }
    }

    pub fn n_features_out(&self) -> usize {
        match self {
            FeatureSelector::Mask { support, .. } => support.len(),
            FeatureSelector::Projection { weights, .. } => weights.len(),
        }
    }

    /// Reduce a combined feature vector
    ///
    /// # Errors
    ///
    /// [`PipelineError::ShapeMismatch`] if `features` is not `n_features_in` long.
    pub fn transform(&self, features: &[f32]) -> Result<Vec<f32>> {
        if features.len() != self.n_features_in() {
            return Err(PipelineError::ShapeMismatch {
                stage: "selector",
                expected: self.n_features_in(),
                actual: features.len(),
            });
        }

        let selected = match self {
            FeatureSelector::Mask { support, .. } => support.iter().map(|&i| features[i]).collect(),
            FeatureSelector::Projection { weights, offset, .. } => weights
                .iter()
                .enumerate()
                .map(|(row, w)| {
                    let dot: f32 = w.iter().zip(features).map(|(a, b)| a * b).sum();
                    dot + offset.as_ref().map_or(0.0, |o| o[row])
                })
                .collect(),
        };
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_mask_keeps_support_columns() {
        let selector = FeatureSelector::mask(5, vec![0, 3, 4]).unwrap();
        assert_eq!(selector.n_features_out(), 3);
        let selected = selector.transform(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(selected, vec![1.0, 4.0, 5.0]);
    }

    #[test]
    fn test_projection_applies_weights_and_offset() {
        let selector = FeatureSelector::projection(
            3,
            vec![vec![1.0, 0.0, 1.0], vec![0.0, 2.0, 0.0]],
            Some(vec![0.5, -1.0]),
        )
        .unwrap();
        let selected = selector.transform(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(selected, vec![4.5, 3.0]);
    }

    #[test]
    fn test_length_mismatch() {
        let selector = FeatureSelector::mask(4, vec![1]).unwrap();
        let err = selector.transform(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::ShapeMismatch {
                stage: "selector",
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_invalid_support_rejected() {
        assert!(FeatureSelector::mask(3, vec![]).is_err());
        assert!(FeatureSelector::mask(3, vec![2, 1]).is_err());
        assert!(FeatureSelector::mask(3, vec![1, 1]).is_err());
        assert!(FeatureSelector::mask(3, vec![0, 3]).is_err());
    }

    #[test]
    fn test_invalid_projection_rejected() {
        assert!(FeatureSelector::projection(2, vec![vec![1.0]], None).is_err());
        assert!(FeatureSelector::projection(1, vec![vec![1.0]], Some(vec![0.0, 0.0])).is_err());
        assert!(FeatureSelector::projection(1, vec![vec![f32::NAN]], None).is_err());
    }

    #[test]
    fn test_load_mask_artifact() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kind": "mask", "n_features_in": 6, "support": [1, 2, 5]}}"#).unwrap();
        let selector = FeatureSelector::load(file.path()).unwrap();
        assert_eq!(selector.n_features_in(), 6);
        assert_eq!(selector.n_features_out(), 3);
    }

    #[test]
    fn test_load_rejects_out_of_range_support() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kind": "mask", "n_features_in": 2, "support": [0, 7]}}"#).unwrap();
        let err = FeatureSelector::load(file.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { name: "selector", .. }));
    }
}
