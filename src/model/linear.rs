//! Ridge-regularised linear regression over feature triples

use serde::{Deserialize, Serialize};

use super::{ModelError, ModelResult};

/// Inputs plus bias
const WIDTH: usize = 4;

/// Default L2 penalty on the non-bias weights
pub const DEFAULT_RIDGE: f64 = 1e-3;

/// Multi-output linear model: `y_k = w_k · [1, x0, x1, x2]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    weights: Vec<[f64; WIDTH]>,
}

impl LinearModel {
    /// Model with explicit weights, `[bias, w0, w1, w2]` per output
    pub fn from_weights(weights: Vec<[f64; WIDTH]>) -> Self {
        Self { weights }
    }

    /// All-zero model with `outputs` outputs
    pub fn zeros(outputs: usize) -> Self {
        Self {
            weights: vec![[0.0; WIDTH]; outputs],
        }
    }

    pub fn outputs(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[[f64; WIDTH]] {
        &self.weights
    }

    /// Evaluate output `k` on one row
    pub fn predict_output(&self, k: usize, x: &[f64; 3]) -> f64 {
        let w = &self.weights[k];
        w[0] + w[1] * x[0] + w[2] * x[1] + w[3] * x[2]
    }

    pub fn predict(&self, x: &[f64; 3]) -> Vec<f64> {
        (0..self.outputs()).map(|k| self.predict_output(k, x)).collect()
    }

    /// Closed-form ridge fit through the normal equations
    pub fn fit<T: AsRef<[f64]>>(inputs: &[[f64; 3]], targets: &[T], ridge: f64) -> ModelResult<Self> {
        if inputs.is_empty() {
            return Err(ModelError::InsufficientData { have: 0, need: 1 });
        }
        if inputs.len() != targets.len() {
            return Err(ModelError::Shape(format!(
                "{} inputs but {} targets",
                inputs.len(),
                targets.len()
            )));
        }

        let outputs = targets[0].as_ref().len();
        if outputs == 0 || targets.iter().any(|t| t.as_ref().len() != outputs) {
            return Err(ModelError::Shape("targets must share a non-zero width".to_string()));
        }

        let mut gram = [[0.0; WIDTH]; WIDTH];
        let mut rhs = vec![[0.0; WIDTH]; outputs];

        for (x, y) in inputs.iter().zip(targets) {
            let row = [1.0, x[0], x[1], x[2]];
            for i in 0..WIDTH {
                for j in 0..WIDTH {
                    gram[i][j] += row[i] * row[j];
                }
                for (k, yk) in y.as_ref().iter().enumerate() {
                    rhs[k][i] += row[i] * yk;
                }
            }
        }

        // Bias stays unpenalised
        for (i, diag) in gram.iter_mut().enumerate().skip(1) {
            diag[i] += ridge;
        }

        let weights = rhs
            .iter()
            .map(|b| solve(gram, *b))
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Self { weights })
    }
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: [[f64; WIDTH]; WIDTH], mut b: [f64; WIDTH]) -> ModelResult<[f64; WIDTH]> {
    for col in 0..WIDTH {
        let pivot = (col..WIDTH)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);

        if !(a[pivot][col].abs() > 1e-12) {
            return Err(ModelError::Singular);
        }

        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..WIDTH {
            let factor = a[row][col] / a[col][col];
            for k in col..WIDTH {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; WIDTH];
    for row in (0..WIDTH).rev() {
        let tail: f64 = ((row + 1)..WIDTH).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(ModelError::Singular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_recovers_linear_relation() {
        // y = 2 + 3a - b + 0.5c
        let inputs: Vec<[f64; 3]> = (0..40)
            .map(|i| {
                let i = i as f64;
                [i % 7.0, (i * 3.0) % 5.0, (i * 2.0) % 3.0]
            })
            .collect();
        let targets: Vec<[f64; 1]> = inputs
            .iter()
            .map(|x| [2.0 + 3.0 * x[0] - x[1] + 0.5 * x[2]])
            .collect();

        let model = LinearModel::fit(&inputs, &targets, 1e-9).unwrap();
        let w = model.weights()[0];
        assert!((w[0] - 2.0).abs() < 1e-4);
        assert!((w[1] - 3.0).abs() < 1e-4);
        assert!((w[2] + 1.0).abs() < 1e-4);
        assert!((w[3] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let inputs = vec![[1.0, 0.0, 0.0], [2.0, 1.0, 0.0], [3.0, 0.0, 1.0], [4.0, 2.0, 2.0]];
        let targets = vec![[1.0, 2.0], [2.0, 3.0], [3.0, 5.0], [5.0, 8.0]];
        let a = LinearModel::fit(&inputs, &targets, DEFAULT_RIDGE).unwrap();
        let b = LinearModel::fit(&inputs, &targets, DEFAULT_RIDGE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.outputs(), 2);
        assert_eq!(a.predict(&[2.5, 1.0, 1.0]), b.predict(&[2.5, 1.0, 1.0]));
    }

    #[test]
    fn test_fit_constant_rows_with_ridge() {
        let inputs = vec![[10.0, 0.0, 0.0]; 5];
        let targets = vec![[10.0]; 5];
        let model = LinearModel::fit(&inputs, &targets, DEFAULT_RIDGE).unwrap();
        assert!((model.predict_output(0, &[10.0, 0.0, 0.0]) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_rejects_bad_shapes() {
        let inputs = vec![[1.0, 2.0, 3.0]];
        let targets: Vec<[f64; 1]> = vec![];
        assert!(matches!(
            LinearModel::fit(&inputs, &targets, DEFAULT_RIDGE),
            Err(ModelError::Shape(_))
        ));
        let empty: Vec<[f64; 3]> = vec![];
        assert!(matches!(
            LinearModel::fit(&empty, &targets, DEFAULT_RIDGE),
            Err(ModelError::InsufficientData { .. })
        ));
    }
}
