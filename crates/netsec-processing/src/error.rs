//! Custom error types for the data stages of the training pipeline.
//!
//! Every failure surfaced by ingestion, validation or transformation is one of
//! the closed set of variants below. Errors carry an [`error_code`] so that the
//! pipeline driver can discriminate between kinds without string matching.
//!
//! [`error_code`]: ProcessingError::error_code

use serde::Serialize;
use serde::ser::SerializeStruct;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the data stages.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The schema document is missing or malformed.
    #[error("Failed to load schema from '{path}': {reason}")]
    SchemaLoad { path: PathBuf, reason: String },

    /// A dataset does not conform to the declared schema.
    #[error("Schema mismatch in {dataset} dataset: {reason}")]
    SchemaMismatch {
        dataset: String,
        reason: String,
        missing_columns: Vec<String>,
    },

    /// One or more columns drifted between the reference and current data.
    #[error("Data drift detected in {} column(s): {}", columns.len(), columns.join(", "))]
    DriftDetected { columns: Vec<String> },

    /// Feature width at transform time differs from fit time.
    #[error("Shape mismatch: expected {expected} feature columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Data violates a stage precondition.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An artifact could not be written.
    #[error("Failed to persist artifact '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Binary (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ProcessingError>,
    },
}

impl ProcessingError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ProcessingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for callers that branch on error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SchemaLoad { .. } => "SCHEMA_LOAD_FAILED",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::DriftDetected { .. } => "DRIFT_DETECTED",
            Self::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Persistence { .. } => "PERSISTENCE_FAILED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &ProcessingError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is the advisory drift signal rather than a hard failure.
    pub fn is_drift(&self) -> bool {
        matches!(self.root(), Self::DriftDetected { .. })
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for ProcessingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ProcessingError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for data-stage operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ProcessingError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ProcessingError::Io(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(
            ProcessingError::ShapeMismatch {
                expected: 3,
                actual: 2
            }
            .error_code(),
            "SHAPE_MISMATCH"
        );
        assert_eq!(
            ProcessingError::ColumnNotFound("test".to_string()).error_code(),
            "COLUMN_NOT_FOUND"
        );
    }

    #[test]
    fn test_schema_mismatch_message() {
        let error = ProcessingError::SchemaMismatch {
            dataset: "train".to_string(),
            reason: "missing numerical columns".to_string(),
            missing_columns: vec!["having_IP_Address".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Schema mismatch in train dataset: missing numerical columns"
        );
    }

    #[test]
    fn test_drift_detected_lists_columns() {
        let error = ProcessingError::DriftDetected {
            columns: vec!["a".to_string(), "b".to_string()],
        };
        assert!(error.to_string().contains("2 column(s): a, b"));
        assert!(error.is_drift());
        assert!(error.with_context("During validation").is_drift());
    }

    #[test]
    fn test_error_serialization() {
        let error = ProcessingError::ColumnNotFound("SSLfinal_State".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("COLUMN_NOT_FOUND"));
        assert!(json.contains("SSLfinal_State"));
    }

    #[test]
    fn test_with_context() {
        let error =
            ProcessingError::InvalidData("empty".to_string()).with_context("During imputation");
        assert!(error.to_string().contains("During imputation"));
        assert_eq!(error.error_code(), "INVALID_DATA"); // Preserves original code
        assert!(matches!(error.root(), ProcessingError::InvalidData(_)));
    }

    #[test]
    fn test_io_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let error = result.context("Reading train.csv").unwrap_err();
        assert_eq!(error.error_code(), "IO_ERROR");
        assert!(error.to_string().starts_with("Reading train.csv"));
    }
}
