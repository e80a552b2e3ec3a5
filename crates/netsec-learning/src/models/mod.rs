//! Native binary classifiers.
//!
//! Every model family has a parameter struct (one point of a search grid)
//! and a fitted type. [`ModelSpec`] names one fully specified configuration
//! and [`TrainedModel`] holds the fitted result behind a single serializable
//! type.
//!
//! All models expect finite `f64` features and labels in `{0.0, 1.0}`, and
//! predict labels in `{0.0, 1.0}`.

pub mod adaboost;
pub mod forest;
pub mod gradient_boosting;
pub mod logistic;
pub mod tree;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, TrainingError};

pub use adaboost::{AdaBoost, AdaBoostParams};
pub use forest::{RandomForest, RandomForestParams};
pub use gradient_boosting::{GradientBoosting, GradientBoostingParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};
pub use tree::{Criterion, DecisionTree, DecisionTreeParams, MaxFeatures};

/// Hyperparameter name to value, ordered by name.
pub type Hyperparameters = BTreeMap<String, serde_json::Value>;

/// The supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    RandomForest,
    DecisionTree,
    GradientBoosting,
    LogisticRegression,
    AdaBoost,
}

impl ModelFamily {
    /// Name used in reports and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RandomForest => "Random Forest",
            Self::DecisionTree => "Decision Tree",
            Self::GradientBoosting => "Gradient Boosting",
            Self::LogisticRegression => "Logistic Regression",
            Self::AdaBoost => "AdaBoost",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One fully specified model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelSpec {
    RandomForest(RandomForestParams),
    DecisionTree(DecisionTreeParams),
    GradientBoosting(GradientBoostingParams),
    LogisticRegression(LogisticRegressionParams),
    AdaBoost(AdaBoostParams),
}

impl ModelSpec {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::DecisionTree(_) => ModelFamily::DecisionTree,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::AdaBoost(_) => ModelFamily::AdaBoost,
        }
    }

    /// The searched hyperparameters of this configuration.
    pub fn hyperparameters(&self) -> Hyperparameters {
        let pairs = match self {
            Self::RandomForest(p) => vec![
                ("max_features", json!(p.max_features.as_str())),
                ("n_estimators", json!(p.n_estimators)),
            ],
            Self::DecisionTree(p) => vec![
                ("criterion", json!(p.criterion.as_str())),
                ("max_features", json!(p.max_features.as_str())),
            ],
            Self::GradientBoosting(p) => vec![
                ("learning_rate", json!(p.learning_rate)),
                ("n_estimators", json!(p.n_estimators)),
            ],
            Self::LogisticRegression(p) => {
                vec![("C", json!(p.c)), ("max_iter", json!(p.max_iter))]
            }
            Self::AdaBoost(p) => vec![
                ("learning_rate", json!(p.learning_rate)),
                ("n_estimators", json!(p.n_estimators)),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Fit this configuration. `seed` drives every random choice of the fit.
    pub fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, seed: u64) -> Result<TrainedModel> {
        Ok(match self {
            Self::RandomForest(p) => TrainedModel::RandomForest(RandomForest::fit(p, x, y, seed)?),
            Self::DecisionTree(p) => TrainedModel::DecisionTree(DecisionTree::fit(p, x, y, seed)?),
            Self::GradientBoosting(p) => {
                TrainedModel::GradientBoosting(GradientBoosting::fit(p, x, y, seed)?)
            }
            Self::LogisticRegression(p) => {
                TrainedModel::LogisticRegression(LogisticRegression::fit(p, x, y)?)
            }
            Self::AdaBoost(p) => TrainedModel::AdaBoost(AdaBoost::fit(p, x, y, seed)?),
        })
    }
}

/// A fitted model of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedModel {
    RandomForest(RandomForest),
    DecisionTree(DecisionTree),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
    AdaBoost(AdaBoost),
}

impl TrainedModel {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::DecisionTree(_) => ModelFamily::DecisionTree,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::AdaBoost(_) => ModelFamily::AdaBoost,
        }
    }

    /// Probability of the positive class per row.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        match self {
            Self::RandomForest(m) => m.predict_proba(x),
            Self::DecisionTree(m) => m.predict_proba(x),
            Self::GradientBoosting(m) => m.predict_proba(x),
            Self::LogisticRegression(m) => m.predict_proba(x),
            Self::AdaBoost(m) => m.predict_proba(x),
        }
    }

    /// Predicted label per row, in `{0.0, 1.0}`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}

// =============================================================================
// Shared checks
// =============================================================================

/// Positive class iff the probability is strictly above one half.
pub(crate) fn to_label(p: f64) -> f64 {
    if p > 0.5 { 1.0 } else { 0.0 }
}

pub(crate) fn validate_training_data(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(TrainingError::InvalidData(format!(
            "training data is empty ({} x {})",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.nrows() != y.len() {
        return Err(TrainingError::InvalidData(format!(
            "{} feature rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(TrainingError::InvalidData(
            "features contain non-finite values".into(),
        ));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(TrainingError::InvalidData(
            "targets contain non-finite values".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_labels(y: ArrayView1<f64>) -> Result<()> {
    if let Some(bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(TrainingError::InvalidData(format!(
            "labels must be 0 or 1, found {bad}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_features(x: ArrayView2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(TrainingError::InvalidData(format!(
            "model expects {} features, got {}",
            n_features,
            x.ncols()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(TrainingError::InvalidData(
            "features contain non-finite values".into(),
        ));
    }
    Ok(())
}

pub(crate) fn has_both_classes(y: ArrayView1<f64>) -> bool {
    y.iter().any(|&v| v == 0.0) && y.iter().any(|&v| v == 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hyperparameters_are_sorted_by_name() {
        let spec = ModelSpec::RandomForest(RandomForestParams {
            n_estimators: 200,
            max_features: MaxFeatures::Log2,
            ..Default::default()
        });
        let params = spec.hyperparameters();
        let keys: Vec<_> = params.keys().cloned().collect();
        assert_eq!(keys, vec!["max_features", "n_estimators"]);
        assert_eq!(params["max_features"], json!("log2"));
        assert_eq!(params["n_estimators"], json!(200));
    }

    #[test]
    fn test_logistic_hyperparameter_name() {
        let spec = ModelSpec::LogisticRegression(LogisticRegressionParams::default());
        let keys: Vec<_> = spec.hyperparameters().keys().cloned().collect();
        assert_eq!(keys, vec!["C", "max_iter"]);
    }

    #[test]
    fn test_every_family_fits_and_predicts_labels() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.2, 0.9], [0.9, 0.1], [0.1, 0.8], [0.8, 0.3]];
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let specs = [
            ModelSpec::RandomForest(RandomForestParams {
                n_estimators: 5,
                ..Default::default()
            }),
            ModelSpec::DecisionTree(DecisionTreeParams::default()),
            ModelSpec::GradientBoosting(GradientBoostingParams {
                n_estimators: 5,
                ..Default::default()
            }),
            ModelSpec::LogisticRegression(LogisticRegressionParams::default()),
            ModelSpec::AdaBoost(AdaBoostParams::default()),
        ];

        for spec in specs {
            let model = spec.fit(x.view(), y.view(), 42).unwrap();
            assert_eq!(model.family(), spec.family());
            let predicted = model.predict(x.view()).unwrap();
            assert!(predicted.iter().all(|&p| p == 0.0 || p == 1.0));
        }
    }

    #[test]
    fn test_trained_model_bincode_roundtrip() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let model = ModelSpec::DecisionTree(DecisionTreeParams::default())
            .fit(x.view(), y.view(), 0)
            .unwrap();

        let bytes = bincode::serialize(&model).unwrap();
        let restored: TrainedModel = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_spec_yaml_uses_model_tag() {
        let spec: ModelSpec =
            serde_yaml::from_str("model: gradient_boosting\nlearning_rate: 0.01\nn_estimators: 200\n")
                .unwrap();
        assert_eq!(
            spec,
            ModelSpec::GradientBoosting(GradientBoostingParams {
                learning_rate: 0.01,
                n_estimators: 200,
                max_depth: 3,
            })
        );
    }

    #[test]
    fn test_validate_training_data() {
        let x = array![[1.0], [2.0]];
        assert!(validate_training_data(x.view(), array![0.0].view()).is_err());
        let empty = ndarray::Array2::<f64>::zeros((0, 3));
        let no_labels = Array1::<f64>::zeros(0);
        assert!(validate_training_data(empty.view(), no_labels.view()).is_err());
        assert!(validate_labels(array![0.0, 1.0, -1.0].view()).is_err());
    }
}
