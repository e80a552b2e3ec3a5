//! Progress reporting types for the training pipeline.
//!
//! This module defines [`TrainingStage`], [`ProgressUpdate`] and the
//! [`ProgressCallback`] type alias.
//!
//! # Overview
//!
//! A callback registered on the pipeline receives one update when each stage
//! starts, one per finished candidate family during model training, and a
//! final update in a terminal stage.
//!
//! # Example
//!
//! ```
//! use netsec_learning::{ProgressUpdate, TrainingPipeline, TrainingPipelineConfig};
//!
//! let pipeline = TrainingPipeline::builder()
//!     .config(TrainingPipelineConfig::default())
//!     .on_progress(|update: ProgressUpdate| {
//!         println!(
//!             "[{}] {:.0}% - {}",
//!             update.stage.as_str(),
//!             update.progress * 100.0,
//!             update.message
//!         );
//!         if let Some((done, total)) = update.models_completed {
//!             println!("  Models: {}/{}", done, total);
//!         }
//!     })
//!     .build();
//! ```

use netsec_processing::PipelineStage;
use std::str::FromStr;
use std::sync::Arc;

/// The current stage of the training pipeline.
///
/// Stages run in this order:
///
/// 1. [`Initializing`](Self::Initializing)
/// 2. [`DataIngestion`](Self::DataIngestion)
/// 3. [`DataValidation`](Self::DataValidation)
/// 4. [`DataTransformation`](Self::DataTransformation)
/// 5. [`ModelTraining`](Self::ModelTraining)
/// 6. [`Complete`](Self::Complete)
///
/// Terminal states: [`Complete`](Self::Complete), [`Failed`](Self::Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TrainingStage {
    /// Creating the run directory and validating configuration.
    #[default]
    Initializing,

    /// Splitting the source CSV into train and test files.
    DataIngestion,

    /// Checking the schema and measuring drift between the splits.
    DataValidation,

    /// Imputing missing values and remapping labels.
    DataTransformation,

    /// Searching the candidate grids, tracking metrics and saving the bundle.
    ModelTraining,

    /// Training completed successfully.
    ///
    /// This is a terminal state. The run result is available.
    Complete,

    /// Training failed.
    ///
    /// This is a terminal state. The message carries the error.
    Failed,
}

impl TrainingStage {
    /// Returns the snake_case name of the stage.
    ///
    /// # Examples
    ///
    /// ```
    /// use netsec_learning::TrainingStage;
    ///
    /// assert_eq!(TrainingStage::ModelTraining.as_str(), "model_training");
    /// assert_eq!(TrainingStage::DataValidation.as_str(), "data_validation");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Initializing => "initializing",
            TrainingStage::DataIngestion => "data_ingestion",
            TrainingStage::DataValidation => "data_validation",
            TrainingStage::DataTransformation => "data_transformation",
            TrainingStage::ModelTraining => "model_training",
            TrainingStage::Complete => "complete",
            TrainingStage::Failed => "failed",
        }
    }

    /// Returns `true` for [`Complete`](Self::Complete) and [`Failed`](Self::Failed).
    ///
    /// # Examples
    ///
    /// ```
    /// use netsec_learning::TrainingStage;
    ///
    /// assert!(TrainingStage::Complete.is_terminal());
    /// assert!(!TrainingStage::ModelTraining.is_terminal());
    /// ```
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStage::Complete | TrainingStage::Failed)
    }
}

impl From<PipelineStage> for TrainingStage {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::DataIngestion => TrainingStage::DataIngestion,
            PipelineStage::DataValidation => TrainingStage::DataValidation,
            PipelineStage::DataTransformation => TrainingStage::DataTransformation,
            PipelineStage::ModelTrainer => TrainingStage::ModelTraining,
        }
    }
}

/// Error type for parsing a [`TrainingStage`] from a string.
///
/// # Example
///
/// ```
/// use netsec_learning::TrainingStage;
///
/// let result: Result<TrainingStage, _> = "invalid".parse();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTrainingStageError {
    invalid_value: String,
}

impl ParseTrainingStageError {
    /// Returns the input that failed to parse.
    #[must_use]
    pub fn invalid_value(&self) -> &str {
        &self.invalid_value
    }
}

impl std::fmt::Display for ParseTrainingStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid training stage: '{}'. Valid values are: initializing, data_ingestion, \
             data_validation, data_transformation, model_training, complete, failed",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseTrainingStageError {}

impl FromStr for TrainingStage {
    type Err = ParseTrainingStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(TrainingStage::Initializing),
            "data_ingestion" => Ok(TrainingStage::DataIngestion),
            "data_validation" => Ok(TrainingStage::DataValidation),
            "data_transformation" => Ok(TrainingStage::DataTransformation),
            "model_training" => Ok(TrainingStage::ModelTraining),
            "complete" => Ok(TrainingStage::Complete),
            "failed" => Ok(TrainingStage::Failed),
            _ => Err(ParseTrainingStageError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// A progress update from the training pipeline.
///
/// # Example
///
/// ```
/// use netsec_learning::{ProgressUpdate, TrainingStage};
///
/// let update = ProgressUpdate {
///     stage: TrainingStage::ModelTraining,
///     progress: 0.6,
///     message: "Finished Random Forest".to_string(),
///     current_model: Some("Random Forest".to_string()),
///     models_completed: Some((1, 5)),
/// };
///
/// println!("{:.0}% complete", update.progress * 100.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: TrainingStage,

    /// Overall progress from 0.0 to 1.0.
    ///
    /// Increases monotonically during a successful run.
    pub progress: f64,

    /// Human-readable status message.
    pub message: String,

    /// Candidate family that just finished its search.
    ///
    /// Only populated during [`ModelTraining`](TrainingStage::ModelTraining).
    pub current_model: Option<String>,

    /// `(completed, total)` candidate families.
    pub models_completed: Option<(u32, u32)>,
}

impl Default for ProgressUpdate {
    fn default() -> Self {
        Self {
            stage: TrainingStage::default(),
            progress: 0.0,
            message: String::new(),
            current_model: None,
            models_completed: None,
        }
    }
}

/// Thread-safe progress callback.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use netsec_learning::{ProgressCallback, ProgressUpdate};
///
/// let callback: ProgressCallback = Arc::new(|update: ProgressUpdate| {
///     println!("[{:?}] {} - {}", update.stage, update.progress, update.message);
/// });
/// ```
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [TrainingStage; 7] = [
        TrainingStage::Initializing,
        TrainingStage::DataIngestion,
        TrainingStage::DataValidation,
        TrainingStage::DataTransformation,
        TrainingStage::ModelTraining,
        TrainingStage::Complete,
        TrainingStage::Failed,
    ];

    #[test]
    fn test_training_stage_from_str() {
        assert_eq!(
            "model_training".parse::<TrainingStage>(),
            Ok(TrainingStage::ModelTraining)
        );

        let err = "training".parse::<TrainingStage>().unwrap_err();
        assert_eq!(err.invalid_value(), "training");
        assert!(err.to_string().contains("Valid values"));
    }

    #[test]
    fn test_training_stage_roundtrip() {
        for stage in ALL_STAGES {
            let parsed: TrainingStage = stage.as_str().parse().unwrap();
            assert_eq!(parsed, stage);
        }
    }

    #[test]
    fn test_training_stage_is_terminal() {
        let terminal: Vec<_> = ALL_STAGES.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&TrainingStage::Complete, &TrainingStage::Failed]);
    }

    #[test]
    fn test_from_pipeline_stage() {
        assert_eq!(
            TrainingStage::from(PipelineStage::ModelTrainer),
            TrainingStage::ModelTraining
        );
        assert_eq!(
            TrainingStage::from(PipelineStage::DataIngestion),
            TrainingStage::DataIngestion
        );
    }

    #[test]
    fn test_progress_update_default() {
        let update = ProgressUpdate::default();
        assert_eq!(update.stage, TrainingStage::Initializing);
        assert_eq!(update.progress, 0.0);
        assert!(update.current_model.is_none());
        assert!(update.models_completed.is_none());
    }
}
