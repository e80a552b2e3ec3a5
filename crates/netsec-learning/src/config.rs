//! Configuration types for the training pipeline.
//!
//! This module provides [`TrainingPipelineConfig`] and its builder, which hold
//! every tunable setting of a run, and [`ModelTrainerConfig`], the per-run
//! configuration of the model training stage.
//!
//! A [`TrainingPipelineConfig`] can be written by hand in YAML; every field is
//! optional and falls back to its default.
//!
//! # Example
//!
//! ```
//! use netsec_learning::TrainingPipelineConfig;
//!
//! let config = TrainingPipelineConfig::builder()
//!     .artifact_root("Artifacts")
//!     .cv_folds(5)
//!     .min_test_accuracy(Some(0.8))
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.cv_folds, 5);
//! ```

use netsec_processing::config::{DEFAULT_ARTIFACT_ROOT, DEFAULT_SCHEMA_PATH, DEFAULT_TARGET_COLUMN};
use netsec_processing::{
    DataIngestionConfig, DataTransformationConfig, DataValidationConfig, ImputerConfig,
    PersistencePolicy, PipelineStage, RunConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainingError};
use crate::selection::CandidateGrid;

/// File name of the serialized inference bundle.
pub const MODEL_FILE_NAME: &str = "model.bin";

/// Default experiment name used by the trackers.
pub const DEFAULT_EXPERIMENT_NAME: &str = "netsec";

// =============================================================================
// Model trainer stage
// =============================================================================

/// Configuration of the model training stage.
///
/// Created from a [`RunConfig`] so that the bundle lands in the run's
/// `model_trainer/trained_model/` directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerConfig {
    /// Where the inference bundle is written.
    pub trained_model_path: PathBuf,

    /// Candidate families and their grids, in tie-breaking order.
    pub candidates: Vec<CandidateGrid>,

    /// Number of stratified folds used to score each configuration.
    /// Default: 3
    pub cv_folds: usize,

    /// Seed given to every model fit.
    /// Default: 42
    pub random_seed: u64,

    /// Minimum held-out accuracy of the selected model; `None` accepts any.
    /// Default: None
    pub min_test_accuracy: Option<f64>,

    pub persistence: PersistencePolicy,
}

impl ModelTrainerConfig {
    pub fn new(run: &RunConfig) -> Self {
        Self {
            trained_model_path: run
                .stage_dir(PipelineStage::ModelTrainer)
                .join("trained_model")
                .join(MODEL_FILE_NAME),
            candidates: CandidateGrid::defaults(),
            cv_folds: 3,
            random_seed: 42,
            min_test_accuracy: None,
            persistence: PersistencePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<CandidateGrid>) -> Self {
        self.candidates = candidates;
        self
    }

    #[must_use]
    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    #[must_use]
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    #[must_use]
    pub fn with_min_test_accuracy(mut self, min: Option<f64>) -> Self {
        self.min_test_accuracy = min;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::InvalidConfig`] if there are no candidates,
    /// `cv_folds < 2`, or `min_test_accuracy` is outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<()> {
        validate_candidates(&self.candidates)?;
        validate_cv_folds(self.cv_folds)?;
        validate_min_accuracy(self.min_test_accuracy)
    }
}

fn validate_candidates(candidates: &[CandidateGrid]) -> Result<()> {
    if candidates.is_empty() {
        return Err(TrainingError::InvalidConfig(
            "candidates must list at least one model".to_string(),
        ));
    }
    Ok(())
}

fn validate_cv_folds(folds: usize) -> Result<()> {
    if folds < 2 {
        return Err(TrainingError::InvalidConfig(format!(
            "cv_folds must be at least 2, got {folds}"
        )));
    }
    Ok(())
}

fn validate_min_accuracy(min: Option<f64>) -> Result<()> {
    if let Some(value) = min
        && !(0.0..=1.0).contains(&value)
    {
        return Err(TrainingError::InvalidConfig(format!(
            "min_test_accuracy must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

// =============================================================================
// Pipeline configuration
// =============================================================================

/// Configuration for the full training pipeline.
///
/// Use [`TrainingPipelineConfig::builder()`] to construct it in code, or
/// [`from_yaml_file()`](Self::from_yaml_file) to load it from disk.
///
/// # Default Values
///
/// | Field | Default |
/// |-------|---------|
/// | `artifact_root` | `Artifacts` |
/// | `schema_path` | `data_schema/schema.yaml` |
/// | `target_column` | `Result` |
/// | `test_split_ratio` | 0.2 |
/// | `random_seed` | 42 |
/// | `drift_threshold` | 0.05 |
/// | `fail_on_drift` | false |
/// | `imputer` | 3 neighbors, uniform |
/// | `cv_folds` | 3 |
/// | `min_test_accuracy` | none (gate off) |
/// | `candidates` | the five default families |
/// | `persistence` | strict |
/// | `experiment_name` | `netsec` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingPipelineConfig {
    /// Directory under which each run claims a timestamped subdirectory.
    pub artifact_root: PathBuf,

    /// YAML document listing the expected columns.
    pub schema_path: PathBuf,

    /// Name of the label column.
    ///
    /// Labels are expected in `{-1, 1}` (or already in `{0, 1}`).
    pub target_column: String,

    /// Fraction of rows held out by ingestion.
    pub test_split_ratio: f64,

    /// Seed of the ingestion shuffle and of every model fit.
    pub random_seed: u64,

    /// KS p-value below which a column is reported as drifted.
    pub drift_threshold: f64,

    /// Stop after validation with an error when any column drifted.
    ///
    /// When `false`, drift is recorded in the validation artifact and the
    /// pipeline carries on.
    pub fail_on_drift: bool,

    /// KNN imputer settings.
    pub imputer: ImputerConfig,

    /// Number of stratified folds used by the grid search.
    pub cv_folds: usize,

    /// Minimum held-out accuracy of the selected model; `None` accepts any.
    pub min_test_accuracy: Option<f64>,

    /// Candidate families and their grids, in tie-breaking order.
    pub candidates: Vec<CandidateGrid>,

    /// Behaviour when an artifact cannot be written where intended.
    pub persistence: PersistencePolicy,

    /// Experiment under which runs are tracked.
    pub experiment_name: String,
}

impl Default for TrainingPipelineConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from(DEFAULT_ARTIFACT_ROOT),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            test_split_ratio: 0.2,
            random_seed: 42,
            drift_threshold: 0.05,
            fail_on_drift: false,
            imputer: ImputerConfig::default(),
            cv_folds: 3,
            min_test_accuracy: None,
            candidates: CandidateGrid::defaults(),
            persistence: PersistencePolicy::default(),
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
        }
    }
}

impl TrainingPipelineConfig {
    /// Create a new builder for `TrainingPipelineConfig`.
    ///
    /// # Example
    ///
    /// ```
    /// use netsec_learning::TrainingPipelineConfig;
    ///
    /// let config = TrainingPipelineConfig::builder()
    ///     .target_column("label")
    ///     .fail_on_drift(true)
    ///     .build()
    ///     .unwrap();
    /// assert!(config.fail_on_drift);
    /// ```
    #[must_use]
    pub fn builder() -> TrainingPipelineConfigBuilder {
        TrainingPipelineConfigBuilder::default()
    }

    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate a YAML config document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value range.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::InvalidConfig`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_split_ratio > 0.0 && self.test_split_ratio < 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "test_split_ratio must be between 0.0 and 1.0 (exclusive), got {}",
                self.test_split_ratio
            )));
        }
        if !(self.drift_threshold > 0.0 && self.drift_threshold < 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "drift_threshold must be between 0.0 and 1.0 (exclusive), got {}",
                self.drift_threshold
            )));
        }
        if self.target_column.trim().is_empty() {
            return Err(TrainingError::InvalidConfig(
                "target_column must not be empty".to_string(),
            ));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(TrainingError::InvalidConfig(
                "experiment_name must not be empty".to_string(),
            ));
        }
        self.imputer
            .validate()
            .map_err(|e| TrainingError::InvalidConfig(e.to_string()))?;
        validate_cv_folds(self.cv_folds)?;
        validate_min_accuracy(self.min_test_accuracy)?;
        validate_candidates(&self.candidates)
    }

    // Stage configurations derived from a run

    pub fn ingestion_config(&self, run: &RunConfig) -> DataIngestionConfig {
        DataIngestionConfig::new(run)
            .with_test_split_ratio(self.test_split_ratio)
            .with_random_seed(self.random_seed)
            .with_persistence(self.persistence)
    }

    pub fn validation_config(&self, run: &RunConfig) -> DataValidationConfig {
        DataValidationConfig::new(run)
            .with_schema_path(&self.schema_path)
            .with_drift_threshold(self.drift_threshold)
            .with_persistence(self.persistence)
    }

    pub fn transformation_config(&self, run: &RunConfig) -> DataTransformationConfig {
        DataTransformationConfig::new(run)
            .with_target_column(&self.target_column)
            .with_imputer(self.imputer)
            .with_persistence(self.persistence)
    }

    pub fn trainer_config(&self, run: &RunConfig) -> ModelTrainerConfig {
        ModelTrainerConfig::new(run)
            .with_candidates(self.candidates.clone())
            .with_cv_folds(self.cv_folds)
            .with_random_seed(self.random_seed)
            .with_min_test_accuracy(self.min_test_accuracy)
            .with_persistence(self.persistence)
    }
}

/// Builder for [`TrainingPipelineConfig`].
///
/// Created by [`TrainingPipelineConfig::builder()`]. Invalid values are only
/// reported by [`build()`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct TrainingPipelineConfigBuilder {
    config: TrainingPipelineConfig,
}

impl TrainingPipelineConfigBuilder {
    /// Set the artifact root (default: `Artifacts`).
    #[must_use]
    pub fn artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.artifact_root = root.into();
        self
    }

    /// Set the schema document (default: `data_schema/schema.yaml`).
    #[must_use]
    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.schema_path = path.into();
        self
    }

    /// Set the label column (default: `Result`).
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.config.target_column = column.into();
        self
    }

    /// Set the held-out fraction (default: 0.2).
    #[must_use]
    pub fn test_split_ratio(mut self, ratio: f64) -> Self {
        self.config.test_split_ratio = ratio;
        self
    }

    /// Set the random seed for reproducibility (default: 42).
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Set the drift significance threshold (default: 0.05).
    #[must_use]
    pub fn drift_threshold(mut self, threshold: f64) -> Self {
        self.config.drift_threshold = threshold;
        self
    }

    /// Abort after validation when drift is found (default: false).
    #[must_use]
    pub fn fail_on_drift(mut self, fail: bool) -> Self {
        self.config.fail_on_drift = fail;
        self
    }

    #[must_use]
    pub fn imputer(mut self, imputer: ImputerConfig) -> Self {
        self.config.imputer = imputer;
        self
    }

    /// Set the number of CV folds (default: 3).
    ///
    /// [`build()`](Self::build) returns an error if `folds < 2`.
    #[must_use]
    pub fn cv_folds(mut self, folds: usize) -> Self {
        self.config.cv_folds = folds;
        self
    }

    /// Set the minimum accepted test accuracy (default: `None`).
    ///
    /// When set, a winner below it fails the run with
    /// [`TrainingError::Underperforming`] and no bundle is written.
    #[must_use]
    pub fn min_test_accuracy(mut self, min: Option<f64>) -> Self {
        self.config.min_test_accuracy = min;
        self
    }

    /// Replace the candidate families.
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<CandidateGrid>) -> Self {
        self.config.candidates = candidates;
        self
    }

    #[must_use]
    pub fn persistence(mut self, policy: PersistencePolicy) -> Self {
        self.config.persistence = policy;
        self
    }

    #[must_use]
    pub fn experiment_name(mut self, name: impl Into<String>) -> Self {
        self.config.experiment_name = name.into();
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::InvalidConfig`] if any value is out of range.
    pub fn build(self) -> Result<TrainingPipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
