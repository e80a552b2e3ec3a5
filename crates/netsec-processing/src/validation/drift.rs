//! Two-sample Kolmogorov–Smirnov drift detection.
//!
//! Every column shared by the reference and current frames is compared with a
//! two-sided KS test. Small samples use the exact lattice-path distribution of
//! the statistic; larger ones fall back to the asymptotic Kolmogorov
//! distribution with Stephens' correction.

use indexmap::IndexMap;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::observed_values;

/// Largest `n_ref * n_cur` for which the exact p-value is computed.
pub const EXACT_PRODUCT_LIMIT: usize = 1_000_000;

/// Default significance threshold.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.05;

/// Drift verdict for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub p_value: f64,
    pub drift_status: bool,
}

/// Per-column drift verdicts, in reference column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriftReport {
    columns: IndexMap<String, ColumnDrift>,
}

impl DriftReport {
    pub fn insert(&mut self, column: impl Into<String>, drift: ColumnDrift) {
        self.columns.insert(column.into(), drift);
    }

    pub fn get(&self, column: &str) -> Option<&ColumnDrift> {
        self.columns.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnDrift)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names of the flagged columns.
    pub fn drifted_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, d)| d.drift_status)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// True when no column is flagged.
    pub fn passed(&self) -> bool {
        self.columns.values().all(|d| !d.drift_status)
    }
}

/// Statistic and two-sided p-value of a KS test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

/// Compares column distributions between two frames.
#[derive(Debug, Clone, Copy)]
pub struct DriftDetector {
    significance_threshold: f64,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_THRESHOLD)
    }
}

impl DriftDetector {
    pub fn new(significance_threshold: f64) -> Self {
        Self {
            significance_threshold,
        }
    }

    pub fn significance_threshold(&self) -> f64 {
        self.significance_threshold
    }

    /// Test every column present in both frames.
    ///
    /// Returns `(passed, report)`; `passed` is false if any column's p-value is
    /// strictly below the threshold.
    pub fn detect(&self, reference: &DataFrame, current: &DataFrame) -> (bool, DriftReport) {
        let mut report = DriftReport::default();

        for name in reference.get_column_names() {
            let name = name.as_str();
            if current.column(name).is_err() {
                debug!("Column '{}' absent from current data, skipping", name);
                continue;
            }

            let (ref_values, cur_values) =
                match (observed_values(reference, name), observed_values(current, name)) {
                    (Ok(r), Ok(c)) => (r, c),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Skipping drift check for '{}': {}", name, e);
                        continue;
                    }
                };

            if ref_values.is_empty() || cur_values.is_empty() {
                warn!(
                    "Column '{}' has no observed values on one side, treating as not drifted",
                    name
                );
                report.insert(
                    name,
                    ColumnDrift {
                        p_value: 1.0,
                        drift_status: false,
                    },
                );
                continue;
            }

            let outcome = ks_two_sample(&ref_values, &cur_values);
            let drift_status = outcome.p_value < self.significance_threshold;
            debug!(
                "KS '{}': D={:.4}, p={:.4e}, drift={}",
                name, outcome.statistic, outcome.p_value, drift_status
            );
            report.insert(
                name,
                ColumnDrift {
                    p_value: outcome.p_value,
                    drift_status,
                },
            );
        }

        (report.passed(), report)
    }
}

// =============================================================================
// KS test
// =============================================================================

/// Two-sided two-sample Kolmogorov–Smirnov test.
///
/// `NaN` entries are ignored. Empty input on either side yields `D = 0`,
/// `p = 1`.
pub fn ks_two_sample(reference: &[f64], current: &[f64]) -> KsOutcome {
    let reference: Vec<f64> = reference.iter().copied().filter(|v| !v.is_nan()).collect();
    let current: Vec<f64> = current.iter().copied().filter(|v| !v.is_nan()).collect();
    let (n1, n2) = (reference.len(), current.len());
    if n1 == 0 || n2 == 0 {
        return KsOutcome {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let gap = max_ecdf_gap(&reference, &current);
    let statistic = gap as f64 / (n1 as f64 * n2 as f64);

    let p_value = if gap == 0 {
        1.0
    } else if n1.saturating_mul(n2) <= EXACT_PRODUCT_LIMIT {
        exact_p_value(n1, n2, gap)
    } else {
        asymptotic_p_value(n1, n2, statistic)
    };

    KsOutcome { statistic, p_value }
}

/// `n1 * n2 * sup|F1 - F2|` as an exact integer.
///
/// Both ECDFs are evaluated after consuming every copy of each distinct value,
/// so ties never inflate the statistic. Inputs must be free of `NaN`.
fn max_ecdf_gap(reference: &[f64], current: &[f64]) -> i64 {
    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n1, n2) = (a.len() as i64, b.len() as i64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut best = 0i64;

    loop {
        let x = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) => x.min(y),
            (Some(&x), None) => x,
            (None, Some(&y)) => y,
            (None, None) => break,
        };
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        best = best.max((i as i64 * n2 - j as i64 * n1).abs());
    }

    best
}

/// `P(D >= d)` under the null, by counting monotone lattice paths from
/// `(0, 0)` to `(n1, n2)` that stay strictly inside the band `|i*n2 - j*n1| < gap`.
///
/// Each cell holds the path count divided by `C(i + j, i)`, which keeps every
/// value in `[0, 1]`.
fn exact_p_value(n1: usize, n2: usize, gap: i64) -> f64 {
    let inside = |i: usize, j: usize| (i as i64 * n2 as i64 - j as i64 * n1 as i64).abs() < gap;

    let mut row = vec![0.0f64; n2 + 1];
    row[0] = 1.0;
    for j in 1..=n2 {
        row[j] = if inside(0, j) { row[j - 1] } else { 0.0 };
    }

    for i in 1..=n1 {
        if !inside(i, 0) {
            row[0] = 0.0;
        }
        for j in 1..=n2 {
            row[j] = if inside(i, j) {
                let total = (i + j) as f64;
                row[j] * (i as f64 / total) + row[j - 1] * (j as f64 / total)
            } else {
                0.0
            };
        }
    }

    (1.0 - row[n2]).clamp(0.0, 1.0)
}

fn asymptotic_p_value(n1: usize, n2: usize, statistic: f64) -> f64 {
    let en = (n1 as f64 * n2 as f64) / (n1 as f64 + n2 as f64);
    let root = en.sqrt();
    kolmogorov_survival((root + 0.12 + 0.11 / root) * statistic)
}

/// Survival function of the Kolmogorov distribution, `Q(λ) = 2 Σ (-1)^(k-1) exp(-2k²λ²)`.
fn kolmogorov_survival(lambda: f64) -> f64 {
    // the alternating series does not converge numerically below this
    if lambda < 0.2 {
        return 1.0;
    }

    let a2 = -2.0 * lambda * lambda;
    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0f64;

    for k in 1..=100 {
        let k = f64::from(k);
        let term = sign * (a2 * k * k).exp();
        sum += term;
        if term.abs() <= 1e-3 * previous || term.abs() <= 1e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous = term.abs();
    }

    1.0
}
