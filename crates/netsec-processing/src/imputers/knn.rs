use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ImputeWeights, ImputerConfig};
use crate::error::{ProcessingError, Result};
use crate::utils::{column_names, frame_to_matrix};

/// Unfitted KNN imputer; holds only its parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct KNNImputer {
    config: ImputerConfig,
}

impl KNNImputer {
    /// Create a new KNN imputer with the given parameters
    pub fn new(config: ImputerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImputerConfig {
        &self.config
    }

    /// Fit on every column of `features`. All columns must be numeric.
    pub fn fit(&self, features: &DataFrame) -> Result<FittedKnnImputer> {
        let names = column_names(features);
        let matrix = frame_to_matrix(features, &names)?;
        self.fit_matrix(names, matrix)
    }

    /// Fit on a matrix whose missing cells are `NaN`.
    pub fn fit_matrix(
        &self,
        feature_names: Vec<String>,
        data: Array2<f64>,
    ) -> Result<FittedKnnImputer> {
        self.config.validate()?;

        if feature_names.len() != data.ncols() {
            return Err(ProcessingError::ShapeMismatch {
                expected: feature_names.len(),
                actual: data.ncols(),
            });
        }
        if data.nrows() == 0 {
            return Err(ProcessingError::InvalidData(
                "cannot fit imputer on an empty dataset".to_string(),
            ));
        }

        let fill_values: Vec<f64> = data
            .axis_iter(Axis(1))
            .zip(&feature_names)
            .map(|(column, name)| {
                let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                if observed.is_empty() {
                    warn!("Column '{}' has no observed values, filling with 0.0", name);
                    0.0
                } else {
                    observed.iter().sum::<f64>() / observed.len() as f64
                }
            })
            .collect();

        debug!(
            "Fitted KNN imputer on {} rows x {} columns (k={}, weights={:?})",
            data.nrows(),
            data.ncols(),
            self.config.n_neighbors,
            self.config.weights
        );

        Ok(FittedKnnImputer {
            feature_names,
            n_neighbors: self.config.n_neighbors,
            weights: self.config.weights,
            fit_data: data,
            fill_values,
        })
    }
}

/// KNN imputer fitted on a training matrix.
///
/// Serializable so the same instance can be reused at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedKnnImputer {
    feature_names: Vec<String>,
    n_neighbors: usize,
    weights: ImputeWeights,
    fit_data: Array2<f64>,
    /// Fallback per column when no donor exists: the fit-time mean, or 0.0.
    fill_values: Vec<f64>,
}

impl FittedKnnImputer {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Impute a frame whose columns match the fit-time feature names.
    ///
    /// Columns are reordered to the fit-time order before imputation.
    pub fn transform_frame(&self, features: &DataFrame) -> Result<Array2<f64>> {
        if features.width() != self.n_features() {
            return Err(ProcessingError::ShapeMismatch {
                expected: self.n_features(),
                actual: features.width(),
            });
        }
        if let Some(missing) = self
            .feature_names
            .iter()
            .find(|name| features.column(name.as_str()).is_err())
        {
            return Err(ProcessingError::ColumnNotFound(missing.clone()));
        }

        let matrix = frame_to_matrix(features, &self.feature_names)?;
        self.transform(matrix.view())
    }

    /// Impute every `NaN` cell of `data`.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features() {
            return Err(ProcessingError::ShapeMismatch {
                expected: self.n_features(),
                actual: data.ncols(),
            });
        }

        let mut output = data.to_owned();
        let mut imputed_cells = 0usize;

        for (row_idx, mut row) in output.axis_iter_mut(Axis(0)).enumerate() {
            let source = data.row(row_idx);
            if !source.iter().any(|v| v.is_nan()) {
                continue;
            }

            let distances: Vec<Option<f64>> = self
                .fit_data
                .axis_iter(Axis(0))
                .map(|donor| nan_euclidean(source, donor))
                .collect();

            for col_idx in 0..self.n_features() {
                if source[col_idx].is_nan() {
                    row[col_idx] = self.impute_cell(&distances, col_idx);
                    imputed_cells += 1;
                }
            }
        }

        debug!("Imputed {} cells", imputed_cells);
        Ok(output)
    }

    fn impute_cell(&self, distances: &[Option<f64>], col_idx: usize) -> f64 {
        // Donors: fit rows with this column observed and at least one shared coordinate
        let mut donors: Vec<(f64, f64)> = distances
            .iter()
            .enumerate()
            .filter_map(|(r, d)| {
                let value = self.fit_data[[r, col_idx]];
                match d {
                    Some(dist) if !value.is_nan() => Some((*dist, value)),
                    _ => None,
                }
            })
            .collect();

        if donors.is_empty() {
            return self.fill_values[col_idx];
        }

        // stable: equal distances keep fit-row order
        donors.sort_by(|a, b| a.0.total_cmp(&b.0));
        donors.truncate(self.n_neighbors);

        match self.weights {
            ImputeWeights::Uniform => {
                donors.iter().map(|(_, v)| v).sum::<f64>() / donors.len() as f64
            }
            ImputeWeights::Distance => {
                let exact: Vec<f64> = donors
                    .iter()
                    .filter(|(d, _)| *d == 0.0)
                    .map(|(_, v)| *v)
                    .collect();
                if !exact.is_empty() {
                    return exact.iter().sum::<f64>() / exact.len() as f64;
                }
                let (weighted, total) = donors
                    .iter()
                    .fold((0.0, 0.0), |(s, w), (d, v)| (s + v / d, w + 1.0 / d));
                weighted / total
            }
        }
    }
}

/// Euclidean distance over coordinates observed in both rows, scaled up by
/// `n / n_present`. `None` when the rows share no observed coordinate.
pub fn nan_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let mut sum_squared = 0.0;
    let mut present = 0usize;

    for (x, y) in a.iter().zip(b.iter()) {
        if !x.is_nan() && !y.is_nan() {
            let diff = x - y;
            sum_squared += diff * diff;
            present += 1;
        }
    }

    if present == 0 {
        return None;
    }
    Some((a.len() as f64 / present as f64 * sum_squared).sqrt())
}
