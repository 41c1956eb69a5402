//! Action-value model backing the policy

use std::path::{Path, PathBuf};
use tracing::info;

use super::linear::{LinearModel, DEFAULT_RIDGE};
use super::{ModelFile, ModelResult, ValueFunction};
use crate::features::FeatureTriple;

const KIND: &str = "action_value";

/// Linear Q approximator with one output per action
#[derive(Debug, Clone)]
pub struct QModel {
    path: PathBuf,
    model: LinearModel,
}

impl QModel {
    /// Load the model, or create and persist a flat one on first run
    ///
    /// A file that exists but cannot be decoded is `Unavailable`.
    pub fn load_or_init(path: impl Into<PathBuf>) -> ModelResult<Self> {
        let path = path.into();
        if !path.exists() {
            let model = LinearModel::zeros(3);
            ModelFile::new(KIND, 0, model.clone()).save(&path)?;
            info!(path = %path.display(), "Initialised fresh policy model");
            return Ok(Self { path, model });
        }

        let file = ModelFile::load(&path, KIND, 3)?;
        info!(path = %path.display(), rows = file.trained_rows, "Loaded policy model");
        Ok(Self {
            path,
            model: file.model,
        })
    }

    /// Wrap an in-memory model without touching disk
    pub fn with_model(path: impl Into<PathBuf>, model: LinearModel) -> Self {
        Self {
            path: path.into(),
            model,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }
}

impl ValueFunction for QModel {
    fn action_values(&self, state: &FeatureTriple) -> [f64; 3] {
        let x = state.as_array();
        [
            self.model.predict_output(0, &x),
            self.model.predict_output(1, &x),
            self.model.predict_output(2, &x),
        ]
    }

    fn fit(&mut self, states: &[FeatureTriple], targets: &[[f64; 3]]) -> ModelResult<()> {
        let inputs: Vec<[f64; 3]> = states.iter().map(FeatureTriple::as_array).collect();
        let model = LinearModel::fit(&inputs, targets, DEFAULT_RIDGE)?;
        ModelFile::new(KIND, states.len(), model.clone()).save(&self.path)?;
        self.model = model;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use tempfile::TempDir;

    #[test]
    fn test_first_run_initialises_flat_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q_model.json");

        let q = QModel::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(q.action_values(&FeatureTriple::new(10.0, 2.0, 1.0)), [0.0; 3]);
    }

    #[test]
    fn test_corrupt_model_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q_model.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            QModel::load_or_init(&path),
            Err(ModelError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_fit_persists_replacement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q_model.json");
        let mut q = QModel::load_or_init(&path).unwrap();

        let states = vec![FeatureTriple::new(5.0, 0.0, 0.0); 4];
        let targets = vec![[0.0, 1.0, 0.0]; 4];
        q.fit(&states, &targets).unwrap();

        let reloaded = QModel::load_or_init(&path).unwrap();
        let values = reloaded.action_values(&FeatureTriple::new(5.0, 0.0, 0.0));
        assert!(values[1] > values[0] && values[1] > values[2]);
    }
}
