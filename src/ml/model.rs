// =============================================================================
// Logistic classifier — gradient-descent sigmoid over the feature vector
// =============================================================================
//
//   P(win | x) = 1 / (1 + exp(-(w·x + b)))
//
// Trained by plain batch gradient descent on log loss. Features arrive
// pre-scaled into roughly [-1, 1] so no normalisation layer is needed, and
// the weight magnitudes stay directly comparable for the suggested-weight
// surface.
// =============================================================================

use serde::{Deserialize, Serialize};

const LEARNING_RATE: f64 = 0.05;
const EPOCHS: usize = 300;
/// L2 shrinkage keeps weights sane on small datasets.
const L2: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// How many samples the model was last fitted on.
    pub trained_on: usize,
}

impl LogisticModel {
    /// Fit a fresh model. Returns `None` when inputs are empty or ragged.
    pub fn train(samples: &[(Vec<f64>, f64)]) -> Option<Self> {
        let first = samples.first()?;
        let dim = first.0.len();
        if dim == 0 || samples.iter().any(|(x, _)| x.len() != dim) {
            return None;
        }

        let n = samples.len() as f64;
        let mut weights = vec![0.0_f64; dim];
        let mut bias = 0.0_f64;

        for _ in 0..EPOCHS {
            let mut grad_w = vec![0.0_f64; dim];
            let mut grad_b = 0.0_f64;

            for (x, y) in samples {
                let p = sigmoid(dot(&weights, x) + bias);
                let err = p - y;
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }

            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * (g / n + L2 * *w);
            }
            bias -= LEARNING_RATE * grad_b / n;
        }

        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return None;
        }

        Some(Self {
            weights,
            bias,
            trained_on: samples.len(),
        })
    }

    /// Predicted win probability in [0, 1]. A ragged input yields `None`.
    pub fn predict(&self, features: &[f64]) -> Option<f64> {
        if features.len() != self.weights.len() {
            return None;
        }
        let p = sigmoid(dot(&self.weights, features) + self.bias);
        p.is_finite().then_some(p)
    }

    /// Absolute weight per feature, normalised so the max is 1. This is the
    /// importance surface the signal engine can optionally absorb.
    pub fn importances(&self) -> Vec<f64> {
        let max = self.weights.iter().map(|w| w.abs()).fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return vec![0.0; self.weights.len()];
        }
        self.weights.iter().map(|w| w.abs() / max).collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
