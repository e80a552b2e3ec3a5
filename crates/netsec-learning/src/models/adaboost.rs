//! Discrete AdaBoost (SAMME) over decision stumps.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{DecisionTree, DecisionTreeParams};
use super::{to_label, validate_features, validate_labels, validate_training_data};
use crate::error::{Result, TrainingError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
}

impl Default for AdaBoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 1.0,
        }
    }
}

impl AdaBoostParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(TrainingError::InvalidConfig(
                "n_estimators must be at least 1".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// A fitted stump ensemble with one vote weight per stump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoost {
    stumps: Vec<DecisionTree>,
    alphas: Vec<f64>,
    n_features: usize,
}

impl AdaBoost {
    /// Fit up to `n_estimators` stumps.
    ///
    /// Boosting stops early when a stump classifies every weighted sample
    /// correctly, or when a later stump is no better than chance. A first
    /// stump that is no better than chance is an error.
    pub fn fit(
        params: &AdaBoostParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        validate_training_data(x, y)?;
        validate_labels(y)?;

        let stump_params = DecisionTreeParams {
            max_depth: Some(1),
            ..Default::default()
        };

        let n = x.nrows();
        let mut weights = Array1::<f64>::from_elem(n, 1.0 / n as f64);
        let mut stumps = Vec::new();
        let mut alphas = Vec::new();

        for m in 0..params.n_estimators {
            let stump = DecisionTree::fit_weighted(
                &stump_params,
                x,
                y,
                Some(weights.view()),
                seed.wrapping_add(m as u64),
            )?;
            let predicted = stump.predict(x)?;
            let miss: Vec<bool> = predicted.iter().zip(y.iter()).map(|(p, t)| p != t).collect();

            let total: f64 = weights.sum();
            let error: f64 = weights
                .iter()
                .zip(&miss)
                .filter(|(_, wrong)| **wrong)
                .map(|(w, _)| *w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                stumps.push(stump);
                alphas.push(1.0);
                debug!("Perfect stump at iteration {m}; stopping");
                break;
            }

            // chance level for two classes
            if error >= 0.5 {
                if stumps.is_empty() {
                    return Err(TrainingError::InvalidData(format!(
                        "first stump is no better than chance (weighted error {error:.4})"
                    )));
                }
                debug!("Stump {m} is no better than chance; stopping");
                break;
            }

            let alpha = params.learning_rate * ((1.0 - error) / error).ln();
            for (w, wrong) in weights.iter_mut().zip(&miss) {
                if *wrong {
                    *w *= alpha.exp();
                }
            }
            let total: f64 = weights.sum();
            weights /= total;

            stumps.push(stump);
            alphas.push(alpha);
        }

        Ok(Self {
            stumps,
            alphas,
            n_features: x.ncols(),
        })
    }

    pub fn n_estimators(&self) -> usize {
        self.stumps.len()
    }

    /// Share of the total vote weight cast for the positive class.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        validate_features(x, self.n_features)?;
        let total: f64 = self.alphas.iter().sum();
        let mut votes = Array1::<f64>::zeros(x.nrows());
        for (stump, &alpha) in self.stumps.iter().zip(&self.alphas) {
            for (vote, row) in votes.iter_mut().zip(x.rows()) {
                if to_label(stump.predict_value(row)) == 1.0 {
                    *vote += alpha;
                }
            }
        }
        Ok(votes / total)
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}
