//! Baseline interval predictor

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

use super::linear::{LinearModel, DEFAULT_RIDGE};
use super::{ModelError, ModelFile, ModelResult, Predictor};
use crate::corpus::TrainingSample;
use crate::features::FeatureTriple;

const KIND: &str = "baseline_interval";

/// Rows in the synthetic bootstrap corpus
const BOOTSTRAP_ROWS: usize = 1000;

/// Linear interval regressor persisted at a fixed path
#[derive(Debug, Clone)]
pub struct BaselineModel {
    path: PathBuf,
    model: LinearModel,
    min_rows: usize,
}

impl BaselineModel {
    /// Load the live model; a missing or corrupt file is `Unavailable`
    pub fn load(path: impl Into<PathBuf>, min_rows: usize) -> ModelResult<Self> {
        let path = path.into();
        let file = ModelFile::load(&path, KIND, 1)?;
        info!(path = %path.display(), rows = file.trained_rows, "Loaded baseline model");
        Ok(Self {
            path,
            model: file.model,
            min_rows,
        })
    }

    /// Wrap an in-memory model, e.g. for tests
    pub fn with_model(path: impl Into<PathBuf>, model: LinearModel, min_rows: usize) -> Self {
        Self {
            path: path.into(),
            model,
            min_rows,
        }
    }

    /// Fit a first model on a synthetic corpus and persist it
    pub fn bootstrap<R: Rng>(
        path: impl Into<PathBuf>,
        rng: &mut R,
        min_interval: f64,
        min_rows: usize,
    ) -> ModelResult<Self> {
        let path = path.into();
        let samples = bootstrap_samples(rng, BOOTSTRAP_ROWS, min_interval);
        let model = fit_samples(&samples)?;
        ModelFile::new(KIND, samples.len(), model.clone()).save(&path)?;
        info!(path = %path.display(), rows = samples.len(), "Bootstrapped baseline model");
        Ok(Self {
            path,
            model,
            min_rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }
}

impl Predictor for BaselineModel {
    fn predict(&self, features: &FeatureTriple) -> f64 {
        self.model.predict_output(0, &features.as_array())
    }

    fn retrain(&mut self, samples: &[TrainingSample]) -> ModelResult<()> {
        if samples.len() < self.min_rows {
            return Err(ModelError::InsufficientData {
                have: samples.len(),
                need: self.min_rows,
            });
        }

        let model = fit_samples(samples)?;
        ModelFile::new(KIND, samples.len(), model.clone()).save(&self.path)?;
        self.model = model;

        info!(rows = samples.len(), "Baseline model retrained");
        Ok(())
    }
}

fn fit_samples(samples: &[TrainingSample]) -> ModelResult<LinearModel> {
    let inputs: Vec<[f64; 3]> = samples.iter().map(|s| s.features.as_array()).collect();
    let targets: Vec<[f64; 1]> = samples.iter().map(|s| [s.predicted_interval]).collect();
    LinearModel::fit(&inputs, &targets, DEFAULT_RIDGE)
}

/// Synthetic corpus: shorter intervals for manual runs and positive preference
pub fn bootstrap_samples<R: Rng>(rng: &mut R, rows: usize, min_interval: f64) -> Vec<TrainingSample> {
    (0..rows)
        .map(|_| {
            let avg = rng.gen_range(4.0..12.0);
            let manual = rng.gen_range(0..=4) as f64;
            let pref = rng.gen_range(-4..=4) as f64;
            let noise = rng.gen_range(-0.5..0.5);
            let target = (avg - manual - pref * 1.5 + noise).max(min_interval);

            TrainingSample {
                task: "synthetic".to_string(),
                features: FeatureTriple::new(avg, pref, manual),
                predicted_interval: target,
            }
        })
        .collect()
}
