//! Random forest of bootstrapped CART trees.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{Criterion, DecisionTree, DecisionTreeParams, MaxFeatures};
use super::{to_label, validate_features, validate_labels, validate_training_data};
use crate::error::{Result, TrainingError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_features: MaxFeatures,
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_features: MaxFeatures::Sqrt,
            criterion: Criterion::Gini,
            max_depth: None,
        }
    }
}

impl RandomForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(TrainingError::InvalidConfig(
                "n_estimators must be at least 1".into(),
            ));
        }
        self.tree_params().validate()
    }

    fn tree_params(&self) -> DecisionTreeParams {
        DecisionTreeParams {
            criterion: self.criterion,
            max_features: self.max_features,
            max_depth: self.max_depth,
            ..Default::default()
        }
    }
}

/// A fitted forest; predictions average the trees' class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fit `n_estimators` trees in parallel.
    ///
    /// Tree `i` draws its bootstrap sample and its split seed from
    /// `seed + i`, so the result does not depend on thread scheduling.
    pub fn fit(
        params: &RandomForestParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        validate_training_data(x, y)?;
        validate_labels(y)?;

        let n = x.nrows();
        let tree_params = params.tree_params();

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut weights = Array1::<f64>::zeros(n);
                for _ in 0..n {
                    weights[rng.gen_range(0..n)] += 1.0;
                }
                let tree_seed: u64 = rng.r#gen();
                DecisionTree::fit_weighted(&tree_params, x, y, Some(weights.view()), tree_seed)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            trees,
            n_features: x.ncols(),
        })
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        validate_features(x, self.n_features)?;
        let mut total = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            for (acc, row) in total.iter_mut().zip(x.rows()) {
                *acc += tree.predict_value(row);
            }
        }
        Ok(total / self.trees.len() as f64)
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let n = 40;
        let mut x = Array2::<f64>::zeros((n, 3));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let positive = i % 2 == 0;
            let base = if positive { 5.0 } else { -5.0 };
            x[[i, 0]] = base + (i % 7) as f64 * 0.1;
            x[[i, 1]] = base * 0.5 + (i % 5) as f64 * 0.01;
            x[[i, 2]] = base - (i % 3) as f64 * 0.2;
            y[i] = if positive { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    #[test]
    fn test_forest_fits_blobs() {
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 10,
            ..Default::default()
        };
        let forest = RandomForest::fit(&params, x.view(), y.view(), 42).unwrap();
        assert_eq!(forest.n_estimators(), 10);
        assert_eq!(forest.predict(x.view()).unwrap(), y);

        let proba = forest.predict_proba(x.view()).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_forest_is_deterministic() {
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 8,
            max_features: MaxFeatures::Log2,
            ..Default::default()
        };
        let a = RandomForest::fit(&params, x.view(), y.view(), 7).unwrap();
        let b = RandomForest::fit(&params, x.view(), y.view(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 0,
            ..Default::default()
        };
        let err = RandomForest::fit(&params, x.view(), y.view(), 0).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_predict_checks_width() {
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 2,
            ..Default::default()
        };
        let forest = RandomForest::fit(&params, x.view(), y.view(), 0).unwrap();
        assert!(forest.predict(array![[1.0, 2.0]].view()).is_err());
    }
}
