//! CART decision trees over dense `f64` features.
//!
//! One implementation serves classification (Gini or entropy impurity over
//! `{0, 1}` labels, leaves hold the positive-class probability) and
//! regression (squared error, leaves hold the weighted mean). Samples carry
//! weights so that bootstrap resampling and boosting reweighting need no
//! copies of the data.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{to_label, validate_features, validate_labels, validate_training_data};
use crate::error::{Result, TrainingError};

/// Gains at or below this are treated as no improvement.
const GAIN_EPSILON: f64 = 1e-12;

/// Split quality measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
    /// Regression impurity, used for boosting residuals.
    SquaredError,
}

impl Criterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gini => "gini",
            Self::Entropy => "entropy",
            Self::SquaredError => "squared_error",
        }
    }

    fn is_classification(&self) -> bool {
        !matches!(self, Self::SquaredError)
    }
}

/// Number of features drawn as split candidates at each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    All,
    Sqrt,
    Log2,
}

impl MaxFeatures {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Sqrt => "sqrt",
            Self::Log2 => "log2",
        }
    }

    /// Concrete feature count for `n_features` columns, never below 1.
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            Self::All => n_features,
            Self::Sqrt => n.sqrt().floor() as usize,
            Self::Log2 => n.log2().floor() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Growth parameters of a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionTreeParams {
    pub criterion: Criterion,
    pub max_features: MaxFeatures,
    /// Unlimited when `None`.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for DecisionTreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_features: MaxFeatures::All,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl DecisionTreeParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == Some(0) {
            return Err(TrainingError::InvalidConfig(
                "max_depth must be at least 1".into(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(TrainingError::InvalidConfig(format!(
                "min_samples_split must be at least 2, got {}",
                self.min_samples_split
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(TrainingError::InvalidConfig(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree. Rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

impl DecisionTree {
    /// Fit with unit sample weights.
    pub fn fit(
        params: &DecisionTreeParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: u64,
    ) -> Result<Self> {
        Self::fit_weighted(params, x, y, None, seed)
    }

    /// Fit with optional non-negative sample weights.
    ///
    /// Samples with zero weight do not take part in the fit at all.
    pub fn fit_weighted(
        params: &DecisionTreeParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        validate_training_data(x, y)?;
        if params.criterion.is_classification() {
            validate_labels(y)?;
        }

        let n = x.nrows();
        let weights: Vec<f64> = match sample_weight {
            Some(w) => {
                if w.len() != n {
                    return Err(TrainingError::InvalidData(format!(
                        "{} sample weights for {} rows",
                        w.len(),
                        n
                    )));
                }
                if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return Err(TrainingError::InvalidData(
                        "sample weights must be finite and non-negative".into(),
                    ));
                }
                w.to_vec()
            }
            None => vec![1.0; n],
        };

        let indices: Vec<usize> = (0..n).filter(|&i| weights[i] > 0.0).collect();
        if indices.is_empty() {
            return Err(TrainingError::InvalidData(
                "all sample weights are zero".into(),
            ));
        }

        let mut builder = TreeBuilder {
            x,
            y,
            weights: &weights,
            params,
            max_features: params.max_features.resolve(x.ncols()),
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
        };
        builder.build(indices, 0);

        Ok(Self {
            nodes: builder.nodes,
            n_features: x.ncols(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Length of the longest root-to-leaf path; a single leaf has depth 0.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Id and value of the leaf reached by `row`.
    fn descend(&self, row: ArrayView1<f64>) -> (usize, f64) {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return (id, *value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }

    /// Index of the leaf reached by `row`.
    pub(crate) fn apply(&self, row: ArrayView1<f64>) -> usize {
        self.descend(row).0
    }

    /// Overwrite the value of leaf `id`; split nodes are left untouched.
    pub(crate) fn set_leaf_value(&mut self, id: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(id) {
            *value = new_value;
        }
    }

    /// Leaf value for a single row, without input checks.
    pub fn predict_value(&self, row: ArrayView1<f64>) -> f64 {
        self.descend(row).1
    }

    /// Leaf value per row: the positive-class probability for classifiers.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        validate_features(x, self.n_features)?;
        Ok(x.rows().into_iter().map(|row| self.predict_value(row)).collect())
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}

// =============================================================================
// Growth
// =============================================================================

/// Weighted first and second moments of the targets in a node.
#[derive(Debug, Clone, Copy, Default)]
struct NodeStats {
    w: f64,
    wy: f64,
    wy2: f64,
}

impl NodeStats {
    fn add(&mut self, y: f64, w: f64) {
        self.w += w;
        self.wy += w * y;
        self.wy2 += w * y * y;
    }

    fn minus(&self, other: &NodeStats) -> NodeStats {
        NodeStats {
            w: self.w - other.w,
            wy: self.wy - other.wy,
            wy2: self.wy2 - other.wy2,
        }
    }

    fn value(&self) -> f64 {
        if self.w > 0.0 { self.wy / self.w } else { 0.0 }
    }

    /// Impurity multiplied by the node weight.
    fn weighted_impurity(&self, criterion: Criterion) -> f64 {
        if self.w <= 0.0 {
            return 0.0;
        }
        let p = (self.wy / self.w).clamp(0.0, 1.0);
        match criterion {
            Criterion::Gini => self.w * 2.0 * p * (1.0 - p),
            Criterion::Entropy => self.w * binary_entropy(p),
            Criterion::SquaredError => (self.wy2 - self.wy * self.wy / self.w).max(0.0),
        }
    }
}

fn binary_entropy(p: f64) -> f64 {
    let term = |q: f64| if q > 0.0 { -q * q.log2() } else { 0.0 };
    term(p) + term(1.0 - p)
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'x, 'y, 'w> {
    x: ArrayView2<'x, f64>,
    y: ArrayView1<'y, f64>,
    weights: &'w [f64],
    params: &'w DecisionTreeParams,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_, '_, '_> {
    /// Grow the subtree over `indices` and return its root id.
    fn build(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let mut stats = NodeStats::default();
        for &i in &indices {
            stats.add(self.y[i], self.weights[i]);
        }

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.value(),
        });

        let criterion = self.params.criterion;
        let at_max_depth = self.params.max_depth.is_some_and(|d| depth >= d);
        let too_small = indices.len() < self.params.min_samples_split
            || indices.len() < 2 * self.params.min_samples_leaf;
        let pure = stats.weighted_impurity(criterion) <= GAIN_EPSILON * stats.w.max(1.0);
        if at_max_depth || too_small || pure {
            return id;
        }

        let Some(split) = self.best_split(&indices, &stats) else {
            return id;
        };

        let column = self.x.column(split.feature);
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| column[i] <= split.threshold);

        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Best split over a random feature subset.
    ///
    /// Features are visited in a seeded random order. Constant features do
    /// not count towards `max_features`, and the search continues past
    /// `max_features` until at least one valid split has been found.
    fn best_split(&mut self, indices: &[usize], parent: &NodeStats) -> Option<Split> {
        let criterion = self.params.criterion;
        let min_leaf = self.params.min_samples_leaf;
        let parent_impurity = parent.weighted_impurity(criterion);

        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut self.rng);

        let mut order = indices.to_vec();
        let mut best: Option<Split> = None;
        let mut visited = 0usize;

        for feature in features {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            let column = self.x.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));
            if column[order[0]] == column[order[order.len() - 1]] {
                continue;
            }
            visited += 1;

            let mut left = NodeStats::default();
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(self.y[i], self.weights[i]);

                let (current, next) = (column[i], column[order[pos + 1]]);
                if current == next {
                    continue;
                }
                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }

                let right = parent.minus(&left);
                let gain = parent_impurity
                    - left.weighted_impurity(criterion)
                    - right.weighted_impurity(criterion);

                if gain > GAIN_EPSILON && best.is_none_or(|b| gain > b.gain) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (ndarray::Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 5.0],
            [2.0, 3.0],
            [3.0, 9.0],
            [10.0, 4.0],
            [11.0, 8.0],
            [12.0, 1.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    // =========================================================================
    // Parameter tests
    // =========================================================================

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::All.resolve(30), 30);
        assert_eq!(MaxFeatures::Sqrt.resolve(30), 5);
        assert_eq!(MaxFeatures::Log2.resolve(30), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(2), 1);
    }

    #[test]
    fn test_params_validate() {
        assert!(DecisionTreeParams::default().validate().is_ok());
        let params = DecisionTreeParams {
            max_depth: Some(0),
            ..Default::default()
        };
        assert_eq!(params.validate().unwrap_err().error_code(), "INVALID_CONFIG");
    }

    // =========================================================================
    // Fit / predict tests
    // =========================================================================

    #[test]
    fn test_fits_separable_data() {
        let (x, y) = separable();
        let tree = DecisionTree::fit(&DecisionTreeParams::default(), x.view(), y.view(), 0).unwrap();

        assert_eq!(tree.predict(x.view()).unwrap(), y);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_threshold_is_midpoint() {
        let (x, y) = separable();
        let tree = DecisionTree::fit(&DecisionTreeParams::default(), x.view(), y.view(), 0).unwrap();
        match &tree.nodes[0] {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 6.5);
            }
            other => panic!("expected a split, got {other:?}"),
        }
    }

    #[test]
    fn test_entropy_criterion() {
        let (x, y) = separable();
        let params = DecisionTreeParams {
            criterion: Criterion::Entropy,
            ..Default::default()
        };
        let tree = DecisionTree::fit(&params, x.view(), y.view(), 3).unwrap();
        assert_eq!(tree.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let params = DecisionTreeParams {
            max_depth: Some(1),
            ..Default::default()
        };
        let tree = DecisionTree::fit(&params, x.view(), y.view(), 0).unwrap();
        assert!(tree.depth() <= 1);
        assert!(tree.n_leaves() <= 2);
    }

    #[test]
    fn test_zero_weight_samples_are_ignored() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 1.0, 1.0, 1.0];
        let w = array![0.0, 1.0, 1.0, 1.0];
        let tree = DecisionTree::fit_weighted(
            &DecisionTreeParams::default(),
            x.view(),
            y.view(),
            Some(w.view()),
            0,
        )
        .unwrap();
        // only positives remain, so the root is a pure leaf
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.predict_proba(array![[1.0]].view()).unwrap()[0], 1.0);
    }

    /// Features and labels borrowed from unrelated arrays, weights built
    /// inside the fit.
    fn fit_on_column_slice(labels: &Array1<f64>) -> DecisionTree {
        let table = array![[9.0, 1.0], [9.0, 2.0], [9.0, 3.0], [9.0, 4.0]];
        let features = table.slice(ndarray::s![.., 1..]);
        DecisionTree::fit_weighted(&DecisionTreeParams::default(), features, labels.view(), None, 0)
            .unwrap()
    }

    #[test]
    fn test_fit_weighted_on_independent_views() {
        let labels = array![0.0, 0.0, 1.0, 1.0];
        let tree = fit_on_column_slice(&labels);
        assert_eq!(tree.n_features(), 1);
        assert_eq!(
            tree.predict(array![[1.5], [3.5]].view()).unwrap(),
            array![0.0, 1.0]
        );
    }

    #[test]
    fn test_regression_leaves_hold_means() {
        let x = array![[0.0], [0.0], [1.0], [1.0]];
        let y = array![1.0, 3.0, 10.0, 14.0];
        let params = DecisionTreeParams {
            criterion: Criterion::SquaredError,
            ..Default::default()
        };
        let tree = DecisionTree::fit(&params, x.view(), y.view(), 0).unwrap();
        let values = tree.predict_proba(x.view()).unwrap();
        assert_eq!(values.to_vec(), vec![2.0, 2.0, 12.0, 12.0]);
    }

    #[test]
    fn test_same_seed_same_tree() {
        let (x, y) = separable();
        let params = DecisionTreeParams {
            max_features: MaxFeatures::Sqrt,
            ..Default::default()
        };
        let a = DecisionTree::fit(&params, x.view(), y.view(), 11).unwrap();
        let b = DecisionTree::fit(&params, x.view(), y.view(), 11).unwrap();
        assert_eq!(a, b);
    }

    // =========================================================================
    // Error tests
    // =========================================================================

    #[test]
    fn test_rejects_non_finite_input() {
        let x = array![[1.0], [f64::NAN]];
        let y = array![0.0, 1.0];
        let err = DecisionTree::fit(&DecisionTreeParams::default(), x.view(), y.view(), 0)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DATA");
    }

    #[test]
    fn test_rejects_non_binary_labels() {
        let x = array![[1.0], [2.0]];
        let y = array![0.0, 2.0];
        assert!(DecisionTree::fit(&DecisionTreeParams::default(), x.view(), y.view(), 0).is_err());
    }

    #[test]
    fn test_predict_checks_width() {
        let (x, y) = separable();
        let tree = DecisionTree::fit(&DecisionTreeParams::default(), x.view(), y.view(), 0).unwrap();
        assert!(tree.predict(array![[1.0]].view()).is_err());
    }
}
