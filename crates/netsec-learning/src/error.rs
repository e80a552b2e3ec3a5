//! Error types for the netsec-learning crate.
//!
//! This module defines [`TrainingError`], the error type returned by model
//! selection, evaluation, experiment tracking and the pipeline driver. Errors
//! raised by the data stages arrive wrapped as
//! [`Processing`](TrainingError::Processing) and keep their own error code.
//!
//! # Example
//!
//! ```no_run
//! use netsec_learning::{TrainingError, TrainingPipelineConfig};
//!
//! fn configure() -> Result<TrainingPipelineConfig, TrainingError> {
//!     // Errors are propagated with ?
//!     let config = TrainingPipelineConfig::builder()
//!         .cv_folds(5)
//!         .build()?;
//!     Ok(config)
//! }
//! ```

use netsec_processing::ProcessingError;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for netsec-learning operations.
///
/// This enum covers all error conditions that can occur during:
/// - Pipeline configuration and validation
/// - Cross-validated model selection
/// - Metric computation
/// - Experiment tracking
/// - Inference bundle packaging and prediction
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TrainingError {
    /// Invalid configuration provided to the pipeline.
    ///
    /// The message names the offending field and the accepted range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid data provided for training, evaluation or inference.
    ///
    /// Common causes:
    /// - Feature matrix and label vector lengths differ
    /// - Features contain non-finite values
    /// - Only one class is present where two are required
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A candidate model failed during grid search.
    ///
    /// Selection aborts on the first failing candidate; no candidate is
    /// skipped silently.
    #[error("Model search failed for {model}: {reason}")]
    SearchFailed {
        /// Name of the failing candidate.
        model: String,
        /// Underlying failure.
        reason: String,
    },

    /// The selected model scored below the configured minimum test accuracy.
    #[error("Best model {model} reached test accuracy {accuracy:.4}, below the required {required:.4}")]
    Underperforming {
        /// Name of the selected model.
        model: String,
        /// Held-out accuracy it reached.
        accuracy: f64,
        /// Configured minimum.
        required: f64,
    },

    /// The experiment tracking backend rejected a call.
    #[error("Experiment tracking failed: {0}")]
    Tracking(String),

    /// An error occurred during inference/prediction.
    ///
    /// Common causes:
    /// - Input features don't match the preprocessor's fit-time features
    /// - Bundle file is corrupted
    #[error("Inference error: {0}")]
    Inference(String),

    /// Binary (de)serialization of a model or bundle failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A data stage failed.
    ///
    /// The wrapped [`ProcessingError`] carries its own error code, which
    /// [`error_code`](Self::error_code) reports unchanged.
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request to the tracking server failed.
    #[cfg(feature = "mlflow")]
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),
}

impl TrainingError {
    /// Get a stable error code for callers that branch on error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::SearchFailed { .. } => "SEARCH_FAILED",
            Self::Underperforming { .. } => "MODEL_UNDERPERFORMING",
            Self::Tracking(_) => "TRACKING_FAILED",
            Self::Inference(_) => "INFERENCE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Processing(err) => err.error_code(),
            Self::Io(_) => "IO_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
            Self::Json(_) => "JSON_ERROR",
            #[cfg(feature = "mlflow")]
            Self::HttpRequest(_) => "HTTP_ERROR",
        }
    }

    /// Check if this error reports data drift.
    pub fn is_drift(&self) -> bool {
        matches!(self, Self::Processing(err) if err.is_drift())
    }

    /// Wrap this error as a [`SearchFailed`](Self::SearchFailed) for `model`.
    pub(crate) fn into_search_failure(self, model: &str) -> Self {
        match self {
            Self::SearchFailed { .. } => self,
            other => Self::SearchFailed {
                model: model.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for TrainingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TrainingError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for learning operations.
pub type Result<T> = std::result::Result<T, TrainingError>;
