//! Learning Models
//!
//! Capability seams between the control loop and the numeric models:
//! - [`Predictor`]: baseline interval regression
//! - [`ValueFunction`]: action-value approximator behind the policy
//!
//! Both shipped implementations are ridge-regularised linear regressors
//! persisted as JSON and replaced atomically on retrain.

mod baseline;
mod linear;
mod value;

pub use baseline::{bootstrap_samples, BaselineModel};
pub use linear::LinearModel;
pub use value::QModel;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::corpus::TrainingSample;
use crate::features::FeatureTriple;
use crate::store::{self, StoreError};

/// Model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },
    #[error("Insufficient training data: have {have} rows, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("Training matrix is singular")]
    Singular,
    #[error("Shape mismatch: {0}")]
    Shape(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Baseline interval regression capability
pub trait Predictor: Send + Sync {
    /// Raw interval estimate for one feature row
    fn predict(&self, features: &FeatureTriple) -> f64;

    /// Refit on the full training corpus and replace the live model
    fn retrain(&mut self, samples: &[TrainingSample]) -> ModelResult<()>;
}

/// Action-value approximator, one value per policy action
pub trait ValueFunction: Send + Sync {
    fn action_values(&self, state: &FeatureTriple) -> [f64; 3];

    /// Refit to `targets` (one row of action values per state) and persist
    fn fit(&mut self, states: &[FeatureTriple], targets: &[[f64; 3]]) -> ModelResult<()>;
}

/// On-disk model document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModelFile {
    pub version: u32,
    pub kind: String,
    pub trained_rows: usize,
    pub trained_at: i64,
    pub model: LinearModel,
}

impl ModelFile {
    pub const VERSION: u32 = 1;

    pub fn new(kind: &str, trained_rows: usize, model: LinearModel) -> Self {
        Self {
            version: Self::VERSION,
            kind: kind.to_string(),
            trained_rows,
            trained_at: chrono::Utc::now().timestamp(),
            model,
        }
    }

    /// Load a model of `kind` with `outputs` outputs; anything else is unavailable
    pub fn load(path: &Path, kind: &str, outputs: usize) -> ModelResult<Self> {
        let file: ModelFile = store::read_json(path).map_err(|e| unavailable(path, e))?;

        if file.kind != kind {
            return Err(ModelError::Unavailable {
                path: path.to_path_buf(),
                reason: format!("expected {} model, found {}", kind, file.kind),
            });
        }
        if file.model.outputs() != outputs {
            return Err(ModelError::Unavailable {
                path: path.to_path_buf(),
                reason: format!(
                    "expected {} outputs, found {}",
                    outputs,
                    file.model.outputs()
                ),
            });
        }
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> ModelResult<()> {
        store::write_json_atomic(path, self).map_err(|e| match e {
            StoreError::Io(e) => ModelError::Io(e),
            StoreError::Serialization(e) => ModelError::Serialization(e),
            other => ModelError::Unavailable {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }
}

fn unavailable(path: &Path, e: StoreError) -> ModelError {
    ModelError::Unavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
