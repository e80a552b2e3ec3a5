//! netsec-learning: model selection, tracking and packaging for the phishing
//! detection training pipeline.
//!
//! This crate drives the data stages of
//! [`netsec_processing`] and adds the model training stage on top: a
//! cross-validated grid search over five native classifier families, binary
//! classification metrics, experiment tracking and a self-contained
//! inference bundle.
//!
//! # Features
//!
//! - **Native models**: random forest, decision tree, gradient boosting,
//!   logistic regression and AdaBoost on `ndarray`, no external runtime
//! - **Model selection**: stratified k-fold grid search, best-of-N on the
//!   held-out split, deterministic tie-breaking
//! - **Experiment tracking**: MLflow-style local file store, or an MLflow
//!   server with the `mlflow` feature
//! - **Inference bundle**: fitted imputer and model saved as one artifact
//! - **Progress reporting**: per-stage and per-candidate callbacks
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use netsec_learning::{InferenceBundle, TrainingPipeline, TrainingPipelineConfig};
//!
//! let config = TrainingPipelineConfig::builder()
//!     .artifact_root("Artifacts")
//!     .schema_path("data_schema/schema.yaml")
//!     .build()?;
//!
//! let mut pipeline = TrainingPipeline::builder()
//!     .config(config)
//!     .on_progress(|u| println!("{:.0}% - {}", u.progress * 100.0, u.message))
//!     .build()?;
//!
//! let result = pipeline.run_from_csv("Network_Data/phisingData.csv".as_ref())?;
//!
//! // Score new rows with exactly what was fitted
//! let bundle = InferenceBundle::load(&result.trainer.trained_model_path)?;
//! let labels = bundle.predict(&new_rows)?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! RunConfig ──► DataIngestion ──► DataValidation ──► DataTransformation
//!                                                           │
//!      InferenceBundle ◄── ExperimentTracker ◄── ModelSelector
//! ```
//!
//! Each arrow is a file artifact handed to the next stage by value.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, TrainingError>`]. Data stage
//! failures are wrapped unchanged in [`TrainingError::Processing`];
//! [`TrainingError::error_code()`] gives a stable code for either kind.
//!
//! # Modules
//!
//! - [`models`] - The classifier families
//! - [`selection`] - Grid search and cross-validation
//! - [`metrics`] - Classification scores
//! - [`tracking`] - Experiment tracking backends

mod bundle;
mod config;
mod error;
pub mod metrics;
pub mod models;
mod pipeline;
mod progress;
pub mod selection;
mod trainer;
pub mod tracking;
mod types;

// Re-export public API
//
// Configuration types
pub use config::{
    DEFAULT_EXPERIMENT_NAME, MODEL_FILE_NAME, ModelTrainerConfig, TrainingPipelineConfig,
    TrainingPipelineConfigBuilder,
};
// Error types
pub use error::{Result, TrainingError};
// Model types
pub use bundle::InferenceBundle;
pub use metrics::{ClassificationMetric, accuracy_score, classification_score};
pub use models::{ModelFamily, ModelSpec, TrainedModel};
pub use selection::{CandidateGrid, CandidateOutcome, ModelSelector};
// Stage and pipeline types
pub use pipeline::{DEFAULT_TRACKING_DIR, TrainingPipeline, TrainingPipelineBuilder};
pub use trainer::{ModelTrainer, split_xy};
pub use tracking::{ExperimentTracker, LocalTracker, TrackingBackend};
// Progress reporting types
pub use progress::{ParseTrainingStageError, ProgressCallback, ProgressUpdate, TrainingStage};
// Result types
pub use types::{CandidateScore, ModelReport, ModelTrainerArtifact, TrainingRunResult};

static_assertions::assert_impl_all!(TrainingPipeline: Send);
static_assertions::assert_impl_all!(InferenceBundle: Send, Sync);
static_assertions::assert_impl_all!(TrainedModel: Send, Sync);
