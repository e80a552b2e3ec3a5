//! Binary classification metrics.
//!
//! The positive class is `1.0`. Every ratio whose denominator is zero
//! resolves to `0.0`, so reported metrics are always finite and in `[0, 1]`.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainingError};

/// F1, precision and recall of a set of predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetric {
    pub f1_score: f64,
    pub precision_score: f64,
    pub recall_score: f64,
}

impl ClassificationMetric {
    /// Metric names and values in logging order.
    pub fn entries(&self) -> [(&'static str, f64); 3] {
        [
            ("f1_score", self.f1_score),
            ("precision_score", self.precision_score),
            ("recall_score", self.recall_score),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: usize,
    fp: usize,
    fn_: usize,
}

fn ensure_same_len(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(TrainingError::InvalidData(format!(
            "y_true has {} labels but y_pred has {}",
            y_true.len(),
            y_pred.len()
        )));
    }
    Ok(())
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Compute F1, precision and recall with `1.0` as the positive class.
pub fn classification_score(
    y_true: ArrayView1<f64>,
    y_pred: ArrayView1<f64>,
) -> Result<ClassificationMetric> {
    ensure_same_len(y_true, y_pred)?;

    let mut c = Confusion::default();
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        match (t == 1.0, p == 1.0) {
            (true, true) => c.tp += 1,
            (false, true) => c.fp += 1,
            (true, false) => c.fn_ += 1,
            (false, false) => {}
        }
    }

    let precision = ratio(c.tp, c.tp + c.fp);
    let recall = ratio(c.tp, c.tp + c.fn_);
    // 2tp / (2tp + fp + fn) equals the harmonic mean and is 0 when tp is 0
    let f1 = ratio(2 * c.tp, 2 * c.tp + c.fp + c.fn_);

    Ok(ClassificationMetric {
        f1_score: f1,
        precision_score: precision,
        recall_score: recall,
    })
}

/// Fraction of predictions equal to the true label.
pub fn accuracy_score(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Result<f64> {
    ensure_same_len(y_true, y_pred)?;
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    Ok(ratio(correct, y_true.len()))
}
