//! Run context and per-stage configuration.
//!
//! A [`RunConfig`] is created once per pipeline invocation and claims a fresh,
//! timestamped directory under the artifact root. Every stage config derives
//! its file locations from it, so no two stages (and no two runs) ever write to
//! the same path.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ProcessingError, Result};

/// Timestamp format used for run directory names.
pub const RUN_ID_FORMAT: &str = "%m_%d_%Y_%H_%M_%S";

/// Default root under which run directories are created.
pub const DEFAULT_ARTIFACT_ROOT: &str = "Artifacts";

/// Default location of the schema document.
pub const DEFAULT_SCHEMA_PATH: &str = "data_schema/schema.yaml";

/// Default label column.
pub const DEFAULT_TARGET_COLUMN: &str = "Result";

pub const FEATURE_STORE_FILE_NAME: &str = "phisingData.csv";
pub const TRAIN_FILE_NAME: &str = "train.csv";
pub const TEST_FILE_NAME: &str = "test.csv";
pub const TRANSFORMED_TRAIN_FILE_NAME: &str = "train.bin";
pub const TRANSFORMED_TEST_FILE_NAME: &str = "test.bin";
pub const PREPROCESSOR_FILE_NAME: &str = "preprocessing.bin";
pub const DRIFT_REPORT_FILE_NAME: &str = "report.yaml";

// =============================================================================
// Persistence policy
// =============================================================================

/// What to do when an artifact cannot be written to its intended location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Fail with [`ProcessingError::Persistence`].
    #[default]
    Strict,
    /// On permission denied, write into the OS temp directory instead and
    /// log a warning. The returned path is the one actually written.
    TempFallback,
}

// =============================================================================
// Run context
// =============================================================================

/// Pipeline stages that own a directory under the run root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    DataIngestion,
    DataValidation,
    DataTransformation,
    ModelTrainer,
}

impl PipelineStage {
    /// Directory name of this stage below the run root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::DataIngestion => "data_ingestion",
            Self::DataValidation => "data_validation",
            Self::DataTransformation => "data_transformation",
            Self::ModelTrainer => "model_trainer",
        }
    }

    /// Human-readable stage name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::DataIngestion => "Data Ingestion",
            Self::DataValidation => "Data Validation",
            Self::DataTransformation => "Data Transformation",
            Self::ModelTrainer => "Model Training",
        }
    }
}

/// Identity and root directory of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    run_id: String,
    artifact_root: PathBuf,
    artifact_dir: PathBuf,
}

impl RunConfig {
    /// Create a run rooted at `artifact_root`, named after the current local time.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Result<Self> {
        Self::from_timestamp(artifact_root, Local::now())
    }

    /// Create a run named after `timestamp`.
    ///
    /// The run directory is created here. If a directory with the same name
    /// already exists, a numeric suffix (`_1`, `_2`, ...) is appended until an
    /// unused name is found.
    pub fn from_timestamp(
        artifact_root: impl Into<PathBuf>,
        timestamp: DateTime<Local>,
    ) -> Result<Self> {
        let artifact_root = artifact_root.into();
        let base = timestamp.format(RUN_ID_FORMAT).to_string();

        fs::create_dir_all(&artifact_root).map_err(|source| ProcessingError::Persistence {
            path: artifact_root.clone(),
            source,
        })?;

        let mut suffix = 0usize;
        loop {
            let run_id = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}_{suffix}")
            };
            let artifact_dir = artifact_root.join(&run_id);

            match fs::create_dir(&artifact_dir) {
                Ok(()) => {
                    debug!("Claimed run directory {}", artifact_dir.display());
                    return Ok(Self {
                        run_id,
                        artifact_root,
                        artifact_dir,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(source) => {
                    return Err(ProcessingError::Persistence {
                        path: artifact_dir,
                        source,
                    });
                }
            }
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    /// Root directory of this run.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Directory owned by `stage` within this run.
    pub fn stage_dir(&self, stage: PipelineStage) -> PathBuf {
        self.artifact_dir.join(stage.dir_name())
    }
}

// =============================================================================
// Validation errors
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid KNN neighbors: {0} (must be at least 1)")]
    InvalidKnnNeighbors(usize),

    #[error("Invalid test split ratio: {0} (must be strictly between 0.0 and 1.0)")]
    InvalidSplitRatio(f64),

    #[error("Field '{0}' must not be empty")]
    EmptyField(String),
}

impl From<ConfigValidationError> for ProcessingError {
    fn from(err: ConfigValidationError) -> Self {
        ProcessingError::InvalidConfig(err.to_string())
    }
}

// =============================================================================
// Imputer configuration
// =============================================================================

/// Weighting applied to the donors of a KNN imputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputeWeights {
    /// Plain mean of the donor values.
    #[default]
    Uniform,
    /// Inverse-distance weighted mean.
    Distance,
}

/// Parameters of the KNN imputer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputerConfig {
    /// Number of donors used per missing cell.
    /// Default: 3
    pub n_neighbors: usize,

    /// Donor weighting.
    /// Default: Uniform
    pub weights: ImputeWeights,
}

impl Default for ImputerConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 3,
            weights: ImputeWeights::Uniform,
        }
    }
}

impl ImputerConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.n_neighbors == 0 {
            return Err(ConfigValidationError::InvalidKnnNeighbors(self.n_neighbors));
        }
        Ok(())
    }
}

// =============================================================================
// Stage configurations
// =============================================================================

/// Paths and split parameters of the ingestion stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIngestionConfig {
    pub feature_store_path: PathBuf,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    /// Fraction of rows held out for testing.
    /// Default: 0.2
    pub test_split_ratio: f64,
    /// Seed of the row shuffle.
    /// Default: 42
    pub random_seed: u64,
    pub persistence: PersistencePolicy,
}

impl DataIngestionConfig {
    pub fn new(run: &RunConfig) -> Self {
        let dir = run.stage_dir(PipelineStage::DataIngestion);
        Self {
            feature_store_path: dir.join("feature_store").join(FEATURE_STORE_FILE_NAME),
            train_path: dir.join("ingested").join(TRAIN_FILE_NAME),
            test_path: dir.join("ingested").join(TEST_FILE_NAME),
            test_split_ratio: 0.2,
            random_seed: 42,
            persistence: PersistencePolicy::default(),
        }
    }

    pub fn with_test_split_ratio(mut self, ratio: f64) -> Self {
        self.test_split_ratio = ratio;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if !(self.test_split_ratio > 0.0 && self.test_split_ratio < 1.0) {
            return Err(ConfigValidationError::InvalidSplitRatio(
                self.test_split_ratio,
            ));
        }
        Ok(())
    }
}

/// Paths and thresholds of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidationConfig {
    pub valid_train_path: PathBuf,
    pub valid_test_path: PathBuf,
    pub invalid_train_path: PathBuf,
    pub invalid_test_path: PathBuf,
    pub drift_report_path: PathBuf,
    pub schema_path: PathBuf,
    /// Two-sided KS p-value below which a column is flagged.
    /// Default: 0.05
    pub drift_threshold: f64,
    pub persistence: PersistencePolicy,
}

impl DataValidationConfig {
    pub fn new(run: &RunConfig) -> Self {
        let dir = run.stage_dir(PipelineStage::DataValidation);
        Self {
            valid_train_path: dir.join("validated").join(TRAIN_FILE_NAME),
            valid_test_path: dir.join("validated").join(TEST_FILE_NAME),
            invalid_train_path: dir.join("invalid").join(TRAIN_FILE_NAME),
            invalid_test_path: dir.join("invalid").join(TEST_FILE_NAME),
            drift_report_path: dir.join("drift_report").join(DRIFT_REPORT_FILE_NAME),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            drift_threshold: 0.05,
            persistence: PersistencePolicy::default(),
        }
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = path.into();
        self
    }

    pub fn with_drift_threshold(mut self, threshold: f64) -> Self {
        self.drift_threshold = threshold;
        self
    }

    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.drift_threshold) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "drift_threshold".to_string(),
                value: self.drift_threshold,
            });
        }
        Ok(())
    }
}

/// Paths and imputer settings of the transformation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformationConfig {
    pub transformed_train_path: PathBuf,
    pub transformed_test_path: PathBuf,
    pub preprocessor_path: PathBuf,
    /// Label column, appended as the last column of the transformed arrays.
    /// Default: "Result"
    pub target_column: String,
    pub imputer: ImputerConfig,
    pub persistence: PersistencePolicy,
}

impl DataTransformationConfig {
    pub fn new(run: &RunConfig) -> Self {
        let dir = run.stage_dir(PipelineStage::DataTransformation);
        Self {
            transformed_train_path: dir.join("transformed").join(TRANSFORMED_TRAIN_FILE_NAME),
            transformed_test_path: dir.join("transformed").join(TRANSFORMED_TEST_FILE_NAME),
            preprocessor_path: dir.join("transformed_object").join(PREPROCESSOR_FILE_NAME),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            imputer: ImputerConfig::default(),
            persistence: PersistencePolicy::default(),
        }
    }

    pub fn with_target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    pub fn with_imputer(mut self, imputer: ImputerConfig) -> Self {
        self.imputer = imputer;
        self
    }

    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.target_column.trim().is_empty() {
            return Err(ConfigValidationError::EmptyField(
                "target_column".to_string(),
            ));
        }
        self.imputer.validate()
    }
}
