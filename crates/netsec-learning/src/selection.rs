//! Cross-validated grid search and best-of-N model selection.
//!
//! Each candidate family is searched independently: every configuration of
//! its grid is scored by mean stratified k-fold accuracy, the best one is
//! refit on the full training split and scored once on the test split. The
//! candidate with the highest test accuracy wins.
//!
//! Ties never depend on thread scheduling: configurations are scored in
//! parallel but compared in grid order, and candidates are compared in the
//! order given. In both cases the first of equal scores is kept.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TrainingError};
use crate::metrics::accuracy_score;
use crate::models::{
    AdaBoostParams, Criterion, DecisionTreeParams, GradientBoostingParams, Hyperparameters,
    LogisticRegressionParams, MaxFeatures, ModelFamily, ModelSpec, RandomForestParams,
    TrainedModel,
};
use crate::types::{CandidateScore, ModelReport};

// =============================================================================
// Search space
// =============================================================================

/// The discrete hyperparameter grid of one candidate family.
///
/// Configurations expand with keys in alphabetical order, the last key
/// varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CandidateGrid {
    RandomForest {
        max_features: Vec<MaxFeatures>,
        n_estimators: Vec<usize>,
    },
    DecisionTree {
        criterion: Vec<Criterion>,
        max_features: Vec<MaxFeatures>,
    },
    GradientBoosting {
        learning_rate: Vec<f64>,
        n_estimators: Vec<usize>,
    },
    LogisticRegression {
        #[serde(rename = "C")]
        c: Vec<f64>,
        max_iter: Vec<usize>,
    },
    AdaBoost {
        learning_rate: Vec<f64>,
        n_estimators: Vec<usize>,
    },
}

impl CandidateGrid {
    /// The five default candidates, in tie-breaking order.
    pub fn defaults() -> Vec<CandidateGrid> {
        vec![
            Self::RandomForest {
                max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
                n_estimators: vec![100, 200],
            },
            Self::DecisionTree {
                criterion: vec![Criterion::Gini, Criterion::Entropy],
                max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
            },
            Self::GradientBoosting {
                learning_rate: vec![0.1, 0.01],
                n_estimators: vec![100, 200],
            },
            Self::LogisticRegression {
                c: vec![1.0],
                max_iter: vec![1000],
            },
            Self::AdaBoost {
                learning_rate: vec![0.1, 0.01],
                n_estimators: vec![50, 100],
            },
        ]
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest { .. } => ModelFamily::RandomForest,
            Self::DecisionTree { .. } => ModelFamily::DecisionTree,
            Self::GradientBoosting { .. } => ModelFamily::GradientBoosting,
            Self::LogisticRegression { .. } => ModelFamily::LogisticRegression,
            Self::AdaBoost { .. } => ModelFamily::AdaBoost,
        }
    }

    pub fn name(&self) -> &'static str {
        self.family().display_name()
    }

    /// Every configuration of the grid, in expansion order.
    pub fn configurations(&self) -> Vec<ModelSpec> {
        match self {
            Self::RandomForest {
                max_features,
                n_estimators,
            } => product(max_features, n_estimators)
                .map(|(max_features, n_estimators)| {
                    ModelSpec::RandomForest(RandomForestParams {
                        max_features,
                        n_estimators,
                        ..Default::default()
                    })
                })
                .collect(),
            Self::DecisionTree {
                criterion,
                max_features,
            } => product(criterion, max_features)
                .map(|(criterion, max_features)| {
                    ModelSpec::DecisionTree(DecisionTreeParams {
                        criterion,
                        max_features,
                        ..Default::default()
                    })
                })
                .collect(),
            Self::GradientBoosting {
                learning_rate,
                n_estimators,
            } => product(learning_rate, n_estimators)
                .map(|(learning_rate, n_estimators)| {
                    ModelSpec::GradientBoosting(GradientBoostingParams {
                        learning_rate,
                        n_estimators,
                        ..Default::default()
                    })
                })
                .collect(),
            Self::LogisticRegression { c, max_iter } => product(c, max_iter)
                .map(|(c, max_iter)| {
                    ModelSpec::LogisticRegression(LogisticRegressionParams { c, max_iter })
                })
                .collect(),
            Self::AdaBoost {
                learning_rate,
                n_estimators,
            } => product(learning_rate, n_estimators)
                .map(|(learning_rate, n_estimators)| {
                    ModelSpec::AdaBoost(AdaBoostParams {
                        n_estimators,
                        learning_rate,
                    })
                })
                .collect(),
        }
    }
}

/// Cartesian product with `b` varying fastest.
fn product<'a, A: Copy, B: Copy>(a: &'a [A], b: &'a [B]) -> impl Iterator<Item = (A, B)> + 'a {
    a.iter().flat_map(move |&x| b.iter().map(move |&y| (x, y)))
}

// =============================================================================
// Cross-validation
// =============================================================================

/// `(train_indices, test_indices)` of one fold.
pub type Fold = (Vec<usize>, Vec<usize>);

/// Stratified k-fold split without shuffling.
///
/// Samples of each class are dealt to folds in their original order so that
/// every fold receives (as nearly as possible) the same class proportions.
/// Both index lists of a fold are ascending.
pub fn stratified_k_fold(y: ArrayView1<f64>, k: usize) -> Result<Vec<Fold>> {
    let n = y.len();
    if k < 2 {
        return Err(TrainingError::InvalidConfig(format!(
            "cv_folds must be at least 2, got {k}"
        )));
    }
    if n < k {
        return Err(TrainingError::InvalidData(format!(
            "cannot split {n} samples into {k} folds"
        )));
    }
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(TrainingError::InvalidData(format!(
            "label at row {i} is not finite"
        )));
    }

    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    // every label is one of `classes`, so this is its exact index
    let class_of = |v: f64| classes.partition_point(|&c| c < v);

    let counts: Vec<usize> = classes
        .iter()
        .map(|&c| y.iter().filter(|&&v| v == c).count())
        .collect();
    if counts.iter().all(|&count| count < k) {
        return Err(TrainingError::InvalidData(format!(
            "cv_folds={k} is greater than the number of members in every class"
        )));
    }

    // deal the label-sorted samples round robin to get per-fold class quotas
    let mut allocation = vec![vec![0usize; classes.len()]; k];
    let mut position = 0;
    for (class, &count) in counts.iter().enumerate() {
        for _ in 0..count {
            allocation[position % k][class] += 1;
            position += 1;
        }
    }

    let mut test_fold = vec![0usize; n];
    let mut next_fold = vec![0usize; classes.len()];
    let mut used = vec![0usize; classes.len()];
    for (i, &label) in y.iter().enumerate() {
        let class = class_of(label);
        while allocation[next_fold[class]][class] == used[class] {
            next_fold[class] += 1;
            used[class] = 0;
        }
        test_fold[i] = next_fold[class];
        used[class] += 1;
    }

    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| test_fold[i] == fold);
            (train, test)
        })
        .collect())
}

/// Mean accuracy of `spec` over `folds`.
pub fn cross_val_score(
    spec: &ModelSpec,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    folds: &[Fold],
    seed: u64,
) -> Result<f64> {
    let mut total = 0.0;
    for (train, test) in folds {
        let x_fit: Array2<f64> = x.select(Axis(0), train);
        let y_fit = y.select(Axis(0), train);
        let x_eval = x.select(Axis(0), test);
        let y_eval = y.select(Axis(0), test);

        let model = spec.fit(x_fit.view(), y_fit.view(), seed)?;
        let predicted = model.predict(x_eval.view())?;
        total += accuracy_score(y_eval.view(), predicted.view())?;
    }
    Ok(total / folds.len() as f64)
}

// =============================================================================
// Selection
// =============================================================================

/// Result of searching one candidate family.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub name: String,
    pub spec: ModelSpec,
    pub best_params: Hyperparameters,
    pub cv_score: f64,
    pub test_score: f64,
    pub model: TrainedModel,
}

impl CandidateOutcome {
    pub fn score(&self) -> CandidateScore {
        CandidateScore {
            name: self.name.clone(),
            hyperparameters: self.best_params.clone(),
            cv_score: self.cv_score,
            test_score: self.test_score,
        }
    }
}

/// Grid search over a list of candidate families.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    candidates: Vec<CandidateGrid>,
    cv_folds: usize,
    random_seed: u64,
}

impl ModelSelector {
    pub fn new(candidates: Vec<CandidateGrid>, cv_folds: usize, random_seed: u64) -> Result<Self> {
        if candidates.is_empty() {
            return Err(TrainingError::InvalidConfig(
                "at least one candidate model is required".into(),
            ));
        }
        if cv_folds < 2 {
            return Err(TrainingError::InvalidConfig(format!(
                "cv_folds must be at least 2, got {cv_folds}"
            )));
        }
        Ok(Self {
            candidates,
            cv_folds,
            random_seed,
        })
    }

    pub fn candidates(&self) -> &[CandidateGrid] {
        &self.candidates
    }

    /// Search every candidate and return the winner and the full report.
    pub fn select(
        &self,
        x_train: ArrayView2<f64>,
        y_train: ArrayView1<f64>,
        x_test: ArrayView2<f64>,
        y_test: ArrayView1<f64>,
    ) -> Result<(CandidateOutcome, ModelReport)> {
        self.select_with_progress(x_train, y_train, x_test, y_test, |_, _, _| {})
    }

    /// Like [`select`](Self::select), calling `on_candidate(outcome, done, total)`
    /// after each candidate finishes.
    pub fn select_with_progress<F>(
        &self,
        x_train: ArrayView2<f64>,
        y_train: ArrayView1<f64>,
        x_test: ArrayView2<f64>,
        y_test: ArrayView1<f64>,
        mut on_candidate: F,
    ) -> Result<(CandidateOutcome, ModelReport)>
    where
        F: FnMut(&CandidateOutcome, usize, usize),
    {
        let folds = stratified_k_fold(y_train, self.cv_folds)?;
        let total = self.candidates.len();

        let mut report = ModelReport::new();
        let mut best: Option<CandidateOutcome> = None;

        for (done, grid) in self.candidates.iter().enumerate() {
            let outcome = self
                .search(grid, x_train, y_train, x_test, y_test, &folds)
                .map_err(|e| e.into_search_failure(grid.name()))?;

            info!(
                "{}: cv accuracy {:.4}, test accuracy {:.4} with {}",
                outcome.name,
                outcome.cv_score,
                outcome.test_score,
                serde_json::to_string(&outcome.best_params).unwrap_or_default()
            );
            on_candidate(&outcome, done + 1, total);
            report.push(outcome.score());

            if best
                .as_ref()
                .is_none_or(|b| outcome.test_score > b.test_score)
            {
                best = Some(outcome);
            }
        }

        let best = best.ok_or_else(|| {
            TrainingError::InvalidConfig("at least one candidate model is required".into())
        })?;
        info!(
            "Selected {} with test accuracy {:.4}",
            best.name, best.test_score
        );
        Ok((best, report))
    }

    fn search(
        &self,
        grid: &CandidateGrid,
        x_train: ArrayView2<f64>,
        y_train: ArrayView1<f64>,
        x_test: ArrayView2<f64>,
        y_test: ArrayView1<f64>,
        folds: &[Fold],
    ) -> Result<CandidateOutcome> {
        let configurations = grid.configurations();
        if configurations.is_empty() {
            return Err(TrainingError::SearchFailed {
                model: grid.name().to_string(),
                reason: "hyperparameter grid is empty".into(),
            });
        }
        debug!(
            "Searching {} configuration(s) of {}",
            configurations.len(),
            grid.name()
        );

        let scores = configurations
            .par_iter()
            .map(|spec| cross_val_score(spec, x_train, y_train, folds, self.random_seed))
            .collect::<Result<Vec<f64>>>()?;

        let mut best_index = 0;
        for (i, &score) in scores.iter().enumerate().skip(1) {
            if score > scores[best_index] {
                best_index = i;
            }
        }

        let spec = configurations[best_index].clone();
        let model = spec.fit(x_train, y_train, self.random_seed)?;
        let predicted = model.predict(x_test)?;
        let test_score = accuracy_score(y_test, predicted.view())?;

        Ok(CandidateOutcome {
            name: grid.name().to_string(),
            best_params: spec.hyperparameters(),
            spec,
            cv_score: scores[best_index],
            test_score,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};
    use pretty_assertions::assert_eq;

    fn dataset(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let positive = i % 3 != 0;
            x[[i, 0]] = if positive { 1.0 } else { -1.0 };
            x[[i, 1]] = (i % 4) as f64;
            y[i] = if positive { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    // =========================================================================
    // Grid tests
    // =========================================================================

    #[test]
    fn test_grid_expansion_order() {
        let grid = CandidateGrid::RandomForest {
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
            n_estimators: vec![100, 200],
        };
        let params: Vec<_> = grid
            .configurations()
            .iter()
            .map(|spec| spec.hyperparameters())
            .map(|h| {
                (
                    h["max_features"].as_str().unwrap_or_default().to_string(),
                    h["n_estimators"].as_u64().unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(
            params,
            vec![
                ("sqrt".to_string(), 100),
                ("sqrt".to_string(), 200),
                ("log2".to_string(), 100),
                ("log2".to_string(), 200),
            ]
        );
    }

    #[test]
    fn test_default_candidates() {
        let defaults = CandidateGrid::defaults();
        let names: Vec<_> = defaults.iter().map(|g| g.name()).collect();
        assert_eq!(
            names,
            vec![
                "Random Forest",
                "Decision Tree",
                "Gradient Boosting",
                "Logistic Regression",
                "AdaBoost"
            ]
        );
        let sizes: Vec<_> = defaults.iter().map(|g| g.configurations().len()).collect();
        assert_eq!(sizes, vec![4, 4, 4, 1, 4]);
    }

    #[test]
    fn test_grid_yaml() {
        let grid: CandidateGrid =
            serde_yaml::from_str("model: logistic_regression\nC: [0.5, 1.0]\nmax_iter: [100]\n")
                .unwrap();
        assert_eq!(grid.configurations().len(), 2);
        assert_eq!(grid.family(), ModelFamily::LogisticRegression);
    }

    // =========================================================================
    // Fold tests
    // =========================================================================

    #[test]
    fn test_stratified_folds_partition_samples() {
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let folds = stratified_k_fold(y.view(), 3).unwrap();
        assert_eq!(folds.len(), 3);

        let mut seen: Vec<usize> = folds.iter().flat_map(|(_, test)| test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..9).collect::<Vec<_>>());

        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), 9);
            let negatives = test.iter().filter(|&&i| y[i] == 0.0).count();
            assert_eq!(negatives, 1);
            assert_eq!(test.len(), 3);
        }
    }

    #[test]
    fn test_stratified_folds_are_unshuffled() {
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let folds = stratified_k_fold(y.view(), 3).unwrap();
        assert_eq!(folds[0].1, vec![0, 1]);
        assert_eq!(folds[1].1, vec![2, 3]);
        assert_eq!(folds[2].1, vec![4, 5]);
    }

    #[test]
    fn test_stratified_folds_reject_tiny_inputs() {
        assert!(stratified_k_fold(array![0.0, 1.0].view(), 3).is_err());
        assert!(stratified_k_fold(array![0.0, 1.0, 0.0, 1.0].view(), 3).is_err());
        assert!(stratified_k_fold(array![0.0, 1.0].view(), 1).is_err());
    }

    #[test]
    fn test_stratified_folds_reject_non_finite_labels() {
        let y = array![0.0, 1.0, f64::NAN, 1.0, 0.0, 1.0];
        let err = stratified_k_fold(y.view(), 3).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidData(ref msg) if msg.contains("row 2")));

        let y = array![0.0, 1.0, f64::INFINITY, 1.0, 0.0, 1.0];
        assert!(stratified_k_fold(y.view(), 3).is_err());
    }

    #[test]
    fn test_selection_rejects_nan_labels() {
        let (x, mut y) = dataset(30);
        y[4] = f64::NAN;
        let selector = ModelSelector::new(
            vec![CandidateGrid::LogisticRegression {
                c: vec![1.0],
                max_iter: vec![100],
            }],
            3,
            42,
        )
        .unwrap();

        let err = selector
            .select(x.view(), y.view(), x.view(), y.view())
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DATA");
    }

    // =========================================================================
    // Selection tests
    // =========================================================================

    #[test]
    fn test_selection_is_deterministic() {
        let (x, y) = dataset(30);
        let candidates = vec![
            CandidateGrid::DecisionTree {
                criterion: vec![Criterion::Gini, Criterion::Entropy],
                max_features: vec![MaxFeatures::Sqrt],
            },
            CandidateGrid::LogisticRegression {
                c: vec![1.0],
                max_iter: vec![100],
            },
        ];
        let selector = ModelSelector::new(candidates, 3, 42).unwrap();

        let (best_a, report_a) = selector.select(x.view(), y.view(), x.view(), y.view()).unwrap();
        let (best_b, report_b) = selector.select(x.view(), y.view(), x.view(), y.view()).unwrap();
        assert_eq!(report_a, report_b);
        assert_eq!(best_a.name, best_b.name);
        assert_eq!(report_a.len(), 2);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        // both families separate the data perfectly
        let (x, y) = dataset(30);
        let candidates = vec![
            CandidateGrid::DecisionTree {
                criterion: vec![Criterion::Gini],
                max_features: vec![MaxFeatures::All],
            },
            CandidateGrid::AdaBoost {
                learning_rate: vec![0.1],
                n_estimators: vec![10],
            },
        ];
        let selector = ModelSelector::new(candidates, 3, 0).unwrap();
        let (best, report) = selector.select(x.view(), y.view(), x.view(), y.view()).unwrap();

        assert_eq!(report[0].test_score, 1.0);
        assert_eq!(report[1].test_score, 1.0);
        assert_eq!(best.name, "Decision Tree");
    }

    #[test]
    fn test_candidate_failure_aborts_selection() {
        let (x, y) = dataset(30);
        let candidates = vec![CandidateGrid::GradientBoosting {
            learning_rate: vec![-1.0],
            n_estimators: vec![10],
        }];
        let selector = ModelSelector::new(candidates, 3, 0).unwrap();
        let err = selector
            .select(x.view(), y.view(), x.view(), y.view())
            .unwrap_err();
        match err {
            TrainingError::SearchFailed { model, .. } => assert_eq!(model, "Gradient Boosting"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_grid_fails() {
        let (x, y) = dataset(30);
        let candidates = vec![CandidateGrid::AdaBoost {
            learning_rate: vec![],
            n_estimators: vec![50],
        }];
        let selector = ModelSelector::new(candidates, 3, 0).unwrap();
        let err = selector
            .select(x.view(), y.view(), x.view(), y.view())
            .unwrap_err();
        assert_eq!(err.error_code(), "SEARCH_FAILED");
    }

    #[test]
    fn test_selector_rejects_bad_config() {
        assert!(ModelSelector::new(Vec::new(), 3, 0).is_err());
        assert!(ModelSelector::new(CandidateGrid::defaults(), 1, 0).is_err());
    }

    #[test]
    fn test_progress_callback_counts() {
        let (x, y) = dataset(30);
        let candidates = vec![
            CandidateGrid::LogisticRegression {
                c: vec![1.0],
                max_iter: vec![50],
            },
            CandidateGrid::DecisionTree {
                criterion: vec![Criterion::Gini],
                max_features: vec![MaxFeatures::All],
            },
        ];
        let selector = ModelSelector::new(candidates, 3, 0).unwrap();
        let mut calls = Vec::new();
        selector
            .select_with_progress(x.view(), y.view(), x.view(), y.view(), |o, done, total| {
                calls.push((o.name.clone(), done, total))
            })
            .unwrap();
        assert_eq!(
            calls,
            vec![
                ("Logistic Regression".to_string(), 1, 2),
                ("Decision Tree".to_string(), 2, 2)
            ]
        );
    }
}
