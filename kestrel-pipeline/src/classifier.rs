//! Trained binary classifiers
//!
//! The scorer only needs [`Classifier`]. Models are trained elsewhere and
//! shipped as JSON artifacts, one per source, under a model directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use kestrel_core::{FeatureVector, Source, FEATURE_DIM};

use crate::PipelineError;

/// A trained binary classifier over feature vectors.
///
/// Both methods return one entry per input, in input order.
pub trait Classifier {
    /// Predicted labels
    fn predict(&self, batch: &[FeatureVector]) -> Vec<bool>;

    /// `[p(false), p(true)]` per input
    fn predict_proba(&self, batch: &[FeatureVector]) -> Vec<[f64; 2]>;
}

/// Logistic regression over hashed features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub source: Source,
    #[serde(default = "default_dim")]
    pub dim: u32,
    pub bias: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Sparse weights by feature bucket
    pub weights: HashMap<u32, f64>,
}

fn default_dim() -> u32 {
    FEATURE_DIM
}

fn default_threshold() -> f64 {
    0.5
}

impl LogisticModel {
    /// Probability of the positive class
    pub fn probability(&self, features: &FeatureVector) -> f64 {
        let z = features
            .entries()
            .iter()
            .filter_map(|(bucket, x)| self.weights.get(bucket).map(|w| w * x))
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    fn validate(&self, expected: Source) -> Result<(), String> {
        if self.source != expected {
            return Err(format!("trained for {}, not {}", self.source, expected));
        }
        if self.dim != FEATURE_DIM {
            return Err(format!("feature dimension {} != {}", self.dim, FEATURE_DIM));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!("threshold {} outside [0, 1]", self.threshold));
        }
        if let Some(bucket) = self.weights.keys().find(|b| **b >= self.dim) {
            return Err(format!("weight index {} out of range", bucket));
        }
        if !self.bias.is_finite() || self.weights.values().any(|w| !w.is_finite()) {
            return Err("non-finite weights".to_string());
        }
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, batch: &[FeatureVector]) -> Vec<bool> {
        batch
            .iter()
            .map(|x| self.probability(x) >= self.threshold)
            .collect()
    }

    fn predict_proba(&self, batch: &[FeatureVector]) -> Vec<[f64; 2]> {
        batch
            .iter()
            .map(|x| {
                let p = self.probability(x);
                [1.0 - p, p]
            })
            .collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Locates and loads per-source model artifacts
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source: Source) -> PathBuf {
        self.dir.join(format!("{}.json", source.as_str()))
    }

    /// Load the model for `source`
    pub fn load(&self, source: Source) -> Result<LogisticModel, PipelineError> {
        let path = self.path_for(source);
        if !path.exists() {
            return Err(PipelineError::ModelNotFound(path));
        }

        let model = read_model(&path)?;
        model
            .validate(source)
            .map_err(|reason| PipelineError::InvalidModel {
                path: path.clone(),
                reason,
            })?;

        info!(
            "Loaded model for {} from {} ({} weights)",
            source,
            path.display(),
            model.weights.len()
        );
        Ok(model)
    }
}

fn read_model(path: &Path) -> Result<LogisticModel, PipelineError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| PipelineError::InvalidModel {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::hash_features;

    fn model(weights: &[(u32, f64)], bias: f64) -> LogisticModel {
        LogisticModel {
            source: Source::MuckrockFoia,
            dim: FEATURE_DIM,
            bias,
            threshold: 0.5,
            weights: weights.iter().copied().collect(),
        }
    }

    #[test]
    fn test_probability() {
        let x = FeatureVector::from_pairs([(1, 1.0), (2, 0.5)]);
        let m = model(&[(1, 2.0), (2, -2.0), (9, 100.0)], 0.0);
        // z = 2.0 - 1.0 = 1.0
        assert!((m.probability(&x) - sigmoid(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_predict_and_proba_agree() {
        let m = model(&[(1, 3.0)], -1.0);
        let batch = vec![
            FeatureVector::from_pairs([(1, 1.0)]),
            FeatureVector::default(),
        ];

        let labels = m.predict(&batch);
        let proba = m.predict_proba(&batch);

        assert_eq!(labels, vec![true, false]);
        for ([p0, p1], label) in proba.iter().zip(&labels) {
            assert!((p0 + p1 - 1.0).abs() < 1e-12);
            assert_eq!(*p1 >= 0.5, *label);
        }
    }

    #[test]
    fn test_registry_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());

        let err = registry.load(Source::MuckrockFoia).unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotFound(_)));
        assert!(err.to_string().contains("muckrock_foia.json"));
    }

    #[test]
    fn test_registry_load() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let bucket = hash_features("contract").entries()[0].0;
        std::fs::write(
            registry.path_for(Source::MuckrockFoia),
            format!(r#"{{"source": "muckrock_foia", "bias": -0.5, "weights": {{"{}": 4.0}}}}"#, bucket),
        )
        .unwrap();

        let loaded = registry.load(Source::MuckrockFoia).unwrap();
        assert_eq!(loaded.threshold, 0.5);
        assert_eq!(loaded.predict(&[hash_features("contract")]), vec![true]);
        assert_eq!(loaded.predict(&[hash_features("weather")]), vec![false]);
    }

    #[test]
    fn test_registry_rejects_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        std::fs::write(
            registry.path_for(Source::MuckrockFoia),
            format!(r#"{{"source": "muckrock_foia", "bias": 0.0, "weights": {{"{}": 1.0}}}}"#, FEATURE_DIM),
        )
        .unwrap();

        let err = registry.load(Source::MuckrockFoia).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidModel { .. }));
    }
}
