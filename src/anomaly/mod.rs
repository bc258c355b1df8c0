//! Trainable, persistable anomaly classifier.
//!
//! Readings are turned into [`FeatureVector`]s, standardized with a scaler
//! fitted at training time, and scored by an isolation forest. The model is a
//! binary oracle: callers only see [`Classification`]s.
//!
//! An untrained model classifies everything as [`Classification::Normal`].
//! That is the safe default used before a model has been loaded or trained,
//! not an error path.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{self, FeatureVector};
use crate::models::{Classification, Reading};

mod forest;
mod scaler;

pub use forest::ForestParams;
use forest::IsolationForest;
use scaler::StandardScaler;

// ---

/// Bumped whenever the persisted layout changes.
const MODEL_FORMAT_VERSION: u32 = 1;

/// Default expected outlier fraction.
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Training input or model parameters are unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persisted model is missing, unreadable, or from an unknown format.
    #[error("failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("failed to save model to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hyperparameters fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub contamination: f64,
    pub forest: ForestParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            forest: ForestParams::default(),
        }
    }
}

impl ModelConfig {
    // ---
    pub fn validate(&self) -> Result<(), ModelError> {
        // ---
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ModelError::InvalidInput(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.forest.n_trees == 0 || self.forest.max_samples == 0 {
            return Err(ModelError::InvalidInput(
                "forest needs at least one tree and one sample".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fitted {
    scaler: StandardScaler,
    forest: IsolationForest,
}

/// On-disk representation. Opaque to callers.
#[derive(Serialize, Deserialize)]
struct PersistedModel {
    format_version: u32,
    is_trained: bool,
    config: ModelConfig,
    fitted: Option<Fitted>,
}

#[derive(Debug, Clone)]
pub struct AnomalyModel {
    config: ModelConfig,
    fitted: Option<Fitted>,
}

impl Default for AnomalyModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl AnomalyModel {
    // ---
    /// Create an untrained model.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fit the scaler and the forest. Labels on the readings are ignored.
    pub fn train(&mut self, readings: &[Reading]) -> Result<(), ModelError> {
        // ---
        if readings.is_empty() {
            return Err(ModelError::InvalidInput("training set is empty".into()));
        }
        self.config.validate()?;

        let features = features::extract_batch(readings);
        let scaler = StandardScaler::fit(&features);
        let scaled = scaler.transform(&features);
        let forest = IsolationForest::fit(&scaled, &self.config.forest, self.config.contamination);

        tracing::info!(
            "Model trained on {} samples (contamination {}, threshold {:.4})",
            readings.len(),
            self.config.contamination,
            forest.threshold()
        );

        self.fitted = Some(Fitted { scaler, forest });
        Ok(())
    }

    /// Classify a batch. Output has the same length and order as the input.
    pub fn predict(&self, readings: &[Reading]) -> Vec<Classification> {
        // ---
        let Some(fitted) = &self.fitted else {
            return vec![Classification::Normal; readings.len()];
        };

        fitted
            .scaler
            .transform(&features::extract_batch(readings))
            .iter()
            .map(|point| {
                if fitted.forest.is_anomalous(point) {
                    Classification::Anomalous
                } else {
                    Classification::Normal
                }
            })
            .collect()
    }

    /// Raw isolation scores for diagnostics; `None` until trained.
    pub fn scores(&self, readings: &[Reading]) -> Option<Vec<f64>> {
        // ---
        let fitted = self.fitted.as_ref()?;
        let features: Vec<FeatureVector> = features::extract_batch(readings);
        Some(
            fitted
                .scaler
                .transform(&features)
                .iter()
                .map(|point| fitted.forest.score(point))
                .collect(),
        )
    }

    /// Serialize the full model state into an opaque blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        // ---
        let persisted = PersistedModel {
            format_version: MODEL_FORMAT_VERSION,
            is_trained: self.is_trained(),
            config: self.config,
            fitted: self.fitted.clone(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    /// Restore state from a blob produced by [`AnomalyModel::to_bytes`].
    ///
    /// `origin` only labels errors.
    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self, ModelError> {
        // ---
        let load_err = |reason: String| ModelError::Load {
            path: origin.to_path_buf(),
            reason,
        };

        let persisted: PersistedModel =
            serde_json::from_slice(bytes).map_err(|e| load_err(format!("corrupt blob: {e}")))?;

        if persisted.format_version != MODEL_FORMAT_VERSION {
            return Err(load_err(format!(
                "unsupported format version {} (expected {})",
                persisted.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if persisted.is_trained != persisted.fitted.is_some() {
            return Err(load_err("trained flag does not match stored parameters".into()));
        }

        Ok(Self {
            config: persisted.config,
            fitted: persisted.fitted,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        // ---
        let bytes = self.to_bytes()?;
        let save_err = |source| ModelError::Save {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(save_err)?;
        }
        fs::write(path, bytes).map_err(save_err)?;

        tracing::debug!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        // ---
        let bytes = fs::read(path).map_err(|e| ModelError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let model = Self::from_bytes(&bytes, path)?;

        tracing::debug!(
            "Model loaded from {} (trained: {})",
            path.display(),
            model.is_trained()
        );
        Ok(model)
    }
}
