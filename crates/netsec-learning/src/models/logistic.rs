//! L2-regularised logistic regression fit by Newton's method.
//!
//! Minimises `Σ log-loss + ||w||² / (2C)`; the intercept is not penalised.
//! Each Newton step is damped by backtracking until the Armijo condition
//! holds.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{has_both_classes, to_label, validate_features, validate_labels, validate_training_data};
use crate::error::{Result, TrainingError};

const GRADIENT_TOLERANCE: f64 = 1e-8;
const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;
const HESSIAN_RIDGE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticRegressionParams {
    /// Inverse regularisation strength.
    #[serde(rename = "C")]
    pub c: f64,
    pub max_iter: usize,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
        }
    }
}

impl LogisticRegressionParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "C must be a positive number, got {}",
                self.c
            )));
        }
        if self.max_iter == 0 {
            return Err(TrainingError::InvalidConfig(
                "max_iter must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A fitted logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    coefficients: Array1<f64>,
    intercept: f64,
    n_iter: usize,
}

impl LogisticRegression {
    pub fn fit(
        params: &LogisticRegressionParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<Self> {
        params.validate()?;
        validate_training_data(x, y)?;
        validate_labels(y)?;
        if !has_both_classes(y) {
            return Err(TrainingError::InvalidData(
                "logistic regression needs both classes in the training data".into(),
            ));
        }

        let design = with_intercept(x);
        let lambda = 1.0 / params.c;
        let dim = design.ncols();
        let mut beta = Array1::<f64>::zeros(dim);
        let mut loss = objective(&design, y, &beta, lambda);
        let mut n_iter = 0;

        for iter in 1..=params.max_iter {
            n_iter = iter;
            let p = design.dot(&beta).mapv(sigmoid);
            let mut grad = design.t().dot(&(&p - &y));
            let mut hessian = Array2::<f64>::zeros((dim, dim));
            for (row, &pi) in design.rows().into_iter().zip(p.iter()) {
                let w = pi * (1.0 - pi);
                for a in 0..dim {
                    let wa = w * row[a];
                    for b in a..dim {
                        hessian[[a, b]] += wa * row[b];
                    }
                }
            }
            for a in 0..dim {
                for b in 0..a {
                    hessian[[a, b]] = hessian[[b, a]];
                }
                hessian[[a, a]] += HESSIAN_RIDGE;
            }
            // the last coordinate is the intercept
            for j in 0..dim - 1 {
                grad[j] += lambda * beta[j];
                hessian[[j, j]] += lambda;
            }

            if grad.iter().all(|g| g.abs() < GRADIENT_TOLERANCE) {
                break;
            }

            let direction = solve(hessian, grad.clone())?;
            let slope = grad.dot(&direction);
            let mut step = 1.0;
            loop {
                let candidate = &beta - &(step * &direction);
                let candidate_loss = objective(&design, y, &candidate, lambda);
                if candidate_loss <= loss - ARMIJO * step * slope {
                    beta = candidate;
                    loss = candidate_loss;
                    break;
                }
                step *= 0.5;
                if step < MIN_STEP {
                    debug!("Line search stalled after {iter} iterations");
                    return Ok(Self::from_beta(beta, iter));
                }
            }

            if direction.iter().all(|d| (step * d).abs() < GRADIENT_TOLERANCE) {
                break;
            }
        }

        Ok(Self::from_beta(beta, n_iter))
    }

    fn from_beta(beta: Array1<f64>, n_iter: usize) -> Self {
        let dim = beta.len();
        Self {
            coefficients: beta.slice(ndarray::s![..dim - 1]).to_owned(),
            intercept: beta[dim - 1],
            n_iter,
        }
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Newton iterations used by the fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        validate_features(x, self.coefficients.len())?;
        Ok((x.dot(&self.coefficients) + self.intercept).mapv(sigmoid))
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(to_label))
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn with_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = x.dim();
    let mut design = Array2::<f64>::ones((n, d + 1));
    design.slice_mut(ndarray::s![.., ..d]).assign(&x);
    design
}

fn objective(design: &Array2<f64>, y: ArrayView1<f64>, beta: &Array1<f64>, lambda: f64) -> f64 {
    let z = design.dot(beta);
    let data: f64 = z
        .iter()
        .zip(y.iter())
        .map(|(&zi, &yi)| softplus(zi) - yi * zi)
        .sum();
    let dim = beta.len();
    let penalty: f64 = beta.iter().take(dim - 1).map(|b| b * b).sum();
    data + 0.5 * lambda * penalty
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < f64::EPSILON {
            return Err(TrainingError::InvalidData(
                "singular Hessian in logistic regression".into(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}
