//! Shared helpers for moving between polars frames and `ndarray` matrices.

use ndarray::{Array1, Array2};
use polars::prelude::*;

use crate::error::{ProcessingError, Result, ResultExt};

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Column values as `f64`, nulls preserved as `None`.
///
/// Only numeric or all-null columns are accepted; strings are not parsed.
pub fn column_to_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| ProcessingError::ColumnNotFound(name.to_string()))?;

    // an all-empty CSV column is inferred as String
    if column.null_count() == column.len() {
        return Ok(vec![None; column.len()]);
    }

    if !is_numeric_dtype(column.dtype()) {
        return Err(ProcessingError::InvalidData(format!(
            "column '{}' has non-numeric type {}",
            name,
            column.dtype()
        )));
    }

    let cast = column
        .cast(&DataType::Float64)
        .context(format!("Casting '{name}' to f64"))?;
    let values = cast.f64().context(format!("Reading '{name}' as f64"))?;
    Ok(values.into_iter().collect())
}

/// Observed values of a numeric column; nulls and `NaN` are both missing.
pub fn observed_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    Ok(column_to_f64(df, name)?
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .collect())
}

/// Stack `columns` of `df` into a row-major matrix with `NaN` for nulls.
pub fn frame_to_matrix(df: &DataFrame, columns: &[String]) -> Result<Array2<f64>> {
    let mut matrix = Array2::from_elem((df.height(), columns.len()), f64::NAN);
    for (j, name) in columns.iter().enumerate() {
        for (i, value) in column_to_f64(df, name)?.into_iter().enumerate() {
            if let Some(v) = value {
                matrix[[i, j]] = v;
            }
        }
    }
    Ok(matrix)
}

/// Names of every column of `df`, in order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

// =============================================================================
// Label Utilities
// =============================================================================

/// Map the negative-class sentinel `-1` to `0`; every other value passes through.
///
/// Applying it twice is the same as applying it once.
pub fn remap_labels(labels: &[f64]) -> Array1<f64> {
    labels
        .iter()
        .map(|&y| if y == -1.0 { 0.0 } else { y })
        .collect()
}

/// Read the target column as labels, failing on any missing value.
pub fn target_labels(df: &DataFrame, target: &str) -> Result<Array1<f64>> {
    let values = column_to_f64(df, target)?;
    let missing = values.iter().filter(|v| v.is_none()).count();
    if missing > 0 {
        return Err(ProcessingError::InvalidData(format!(
            "target column '{target}' has {missing} missing value(s)"
        )));
    }
    let labels: Vec<f64> = values.into_iter().flatten().collect();
    Ok(remap_labels(&labels))
}
