//! Gradient boosted trees with binomial log-loss.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::logistic::sigmoid;
use super::tree::{Criterion, DecisionTree, DecisionTreeParams, MaxFeatures};
use super::{has_both_classes, to_label, validate_features, validate_labels, validate_training_data};
use crate::error::{Result, TrainingError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingParams {
    pub learning_rate: f64,
    pub n_estimators: usize,
    pub max_depth: usize,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            n_estimators: 100,
            max_depth: 3,
        }
    }
}

impl GradientBoostingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.n_estimators == 0 {
            return Err(TrainingError::InvalidConfig(
                "n_estimators must be at least 1".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(TrainingError::InvalidConfig(
                "max_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A fitted boosted ensemble.
///
/// The raw score of a row is `prior + learning_rate * Σ tree(row)`, where
/// `prior` is the log-odds of the positive class in the training labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    prior: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl GradientBoosting {
    pub fn fit(
        params: &GradientBoostingParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        validate_training_data(x, y)?;
        validate_labels(y)?;
        if !has_both_classes(y) {
            return Err(TrainingError::InvalidData(
                "gradient boosting needs both classes in the training data".into(),
            ));
        }

        let tree_params = DecisionTreeParams {
            criterion: Criterion::SquaredError,
            max_features: MaxFeatures::All,
            max_depth: Some(params.max_depth),
            ..Default::default()
        };

        let positive_rate = y.mean().unwrap_or(0.5);
        let prior = (positive_rate / (1.0 - positive_rate)).ln();
        let mut raw = Array1::<f64>::from_elem(x.nrows(), prior);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for m in 0..params.n_estimators {
            let proba = raw.mapv(sigmoid);
            let residual = &y - &proba;
            let mut tree =
                DecisionTree::fit(&tree_params, x, residual.view(), seed.wrapping_add(m as u64))?;

            // one Newton step per leaf: Σ residual / Σ p(1 - p)
            let leaves: Vec<usize> = x.rows().into_iter().map(|row| tree.apply(row)).collect();
            let n_nodes = leaves.iter().copied().max().map_or(0, |id| id + 1);
            let mut numerator = vec![0.0; n_nodes];
            let mut denominator = vec![0.0; n_nodes];
            for (i, &leaf) in leaves.iter().enumerate() {
                numerator[leaf] += residual[i];
                denominator[leaf] += proba[i] * (1.0 - proba[i]);
            }
            let step: Vec<f64> = numerator
                .iter()
                .zip(&denominator)
                .map(|(&num, &den)| if den.abs() < 1e-150 { 0.0 } else { num / den })
                .collect();
            for &leaf in &leaves {
                tree.set_leaf_value(leaf, step[leaf]);
            }

            for (score, &leaf) in raw.iter_mut().zip(&leaves) {
                *score += params.learning_rate * step[leaf];
            }
            trees.push(tree);
        }

        Ok(Self {
            prior,
            learning_rate: params.learning_rate,
            trees,
            n_features: x.ncols(),
        })
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    /// Raw additive score (log-odds) per row.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        validate_features(x, self.n_features)?;
        let mut raw = Array1::<f64>::from_elem(x.nrows(), self.prior);
        for tree in &self.trees {
            for (score, row) in raw.iter_mut().zip(x.rows()) {
                *score += self.learning_rate * tree.predict_value(row);
            }
        }
        Ok(raw)
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.decision_function(x)?.mapv(sigmoid))
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}
