//! Data stages of the netsec training pipeline.
//!
//! # Overview
//!
//! This crate owns everything between the raw CSV source and the numeric
//! arrays consumed by model training:
//!
//! - **Run context**: [`RunConfig`] claims a unique, timestamped artifact
//!   directory per execution; stage configs derive their paths from it
//! - **Ingestion**: local CSV source → feature store → seeded train/test split
//! - **Validation**: schema conformance ([`SchemaValidator`]) and per-column
//!   two-sample Kolmogorov–Smirnov drift detection ([`DriftDetector`])
//! - **Transformation**: KNN imputation fit on train and applied to both
//!   splits, labels remapped from `{-1, 1}` to `{0, 1}`
//!
//! Each stage consumes the previous stage's artifact (a record of file paths)
//! and returns its own.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use netsec_processing::*;
//!
//! let run = RunConfig::new("Artifacts")?;
//!
//! let ingestion = DataIngestion::new(DataIngestionConfig::new(&run))?
//!     .initiate_from_csv("Network_Data/phisingData.csv".as_ref())?;
//!
//! let validation = DataValidation::new(DataValidationConfig::new(&run))?
//!     .initiate(&ingestion)?;
//! if !validation.validation_status {
//!     eprintln!("drift in: {:?}", validation.drifted_columns);
//! }
//!
//! let transformed = DataTransformation::new(DataTransformationConfig::new(&run))?
//!     .initiate(&validation)?;
//! ```

pub mod artifacts;
pub mod config;
pub mod error;
pub mod imputers;
pub mod ingestion;
pub mod transformation;
pub mod types;
pub mod utils;
pub mod validation;

// Re-exports for convenient access
pub use config::{
    ConfigValidationError, DataIngestionConfig, DataTransformationConfig, DataValidationConfig,
    ImputeWeights, ImputerConfig, PersistencePolicy, PipelineStage, RunConfig,
};
pub use error::{ProcessingError, Result as ProcessingResult, ResultExt};
pub use imputers::{FittedKnnImputer, KNNImputer};
pub use ingestion::{DataIngestion, train_test_split};
pub use transformation::{
    DataTransformation, append_label, load_preprocessor, load_transformed_array, split_features,
};
pub use types::{DataTransformationArtifact, DataValidationArtifact, IngestionArtifact};
pub use utils::{frame_to_matrix, remap_labels};
pub use validation::{
    ColumnDrift, DataValidation, DriftDetector, DriftReport, SchemaSpec, SchemaValidator,
    ks_two_sample,
};

static_assertions::assert_impl_all!(FittedKnnImputer: Send, Sync);
static_assertions::assert_impl_all!(DataValidation: Send, Sync);
