//! Training pipeline driver.
//!
//! This module provides [`TrainingPipeline`] and its builder. The pipeline
//! claims a fresh run directory and runs the four stages strictly in
//! sequence, each one consuming the artifact of the previous one.
//!
//! # Overview
//!
//! 1. **Data ingestion** - Copy the source CSV and split it into train and test
//! 2. **Data validation** - Check the schema and measure drift between splits
//! 3. **Data transformation** - Fit the KNN imputer and remap labels
//! 4. **Model training** - Grid search, metrics, tracking and the inference bundle
//!
//! Drift is advisory unless
//! [`fail_on_drift`](crate::TrainingPipelineConfig::fail_on_drift) is set.
//!
//! # Example
//!
//! ```rust,ignore
//! use netsec_learning::{TrainingPipeline, TrainingPipelineConfig};
//! use netsec_learning::tracking::LocalTracker;
//!
//! let config = TrainingPipelineConfig::builder()
//!     .artifact_root("Artifacts")
//!     .schema_path("data_schema/schema.yaml")
//!     .build()?;
//!
//! let mut pipeline = TrainingPipeline::builder()
//!     .config(config)
//!     .tracker(LocalTracker::new("mlruns", "netsec"))
//!     .on_progress(|update| {
//!         println!("[{}] {:.0}% - {}", update.stage.as_str(), update.progress * 100.0, update.message);
//!     })
//!     .build()?;
//!
//! let result = pipeline.run_from_csv("Network_Data/phisingData.csv".as_ref())?;
//! println!("Best model: {}", result.trainer.best_model_name);
//! ```

use netsec_processing::{
    DataIngestion, DataTransformation, DataValidation, IngestionArtifact, RunConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::TrainingPipelineConfig;
use crate::error::{Result, TrainingError};
use crate::progress::{ProgressCallback, ProgressUpdate, TrainingStage};
use crate::tracking::{ExperimentTracker, LocalTracker, TrackingBackend};
use crate::trainer::ModelTrainer;
use crate::types::TrainingRunResult;

/// Directory below the artifact root used by the default local tracker.
pub const DEFAULT_TRACKING_DIR: &str = "mlruns";

// Overall progress at the start of each stage
const INGESTION_PROGRESS: f64 = 0.05;
const VALIDATION_PROGRESS: f64 = 0.15;
const TRANSFORMATION_PROGRESS: f64 = 0.25;
const TRAINING_PROGRESS: f64 = 0.35;

enum Source {
    Csv(PathBuf),
    Ingested(IngestionArtifact),
}

/// Clonable handle on the optional progress callback.
#[derive(Clone, Default)]
struct Reporter {
    callback: Option<ProgressCallback>,
}

impl Reporter {
    fn emit(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.callback {
            callback(update);
        }
    }

    fn stage(&self, stage: TrainingStage, progress: f64, message: impl Into<String>) {
        self.emit(ProgressUpdate {
            stage,
            progress,
            message: message.into(),
            ..Default::default()
        });
    }
}

/// The end-to-end training pipeline.
///
/// Use [`TrainingPipeline::builder()`] to construct one. A pipeline can be
/// run any number of times; every run writes below its own run directory.
pub struct TrainingPipeline {
    config: TrainingPipelineConfig,
    tracker: ExperimentTracker,
    reporter: Reporter,
}

impl std::fmt::Debug for TrainingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingPipeline")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .field(
                "progress_callback",
                &self.reporter.callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl TrainingPipeline {
    /// Create a new builder for `TrainingPipeline`.
    #[must_use]
    pub fn builder() -> TrainingPipelineBuilder {
        TrainingPipelineBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &TrainingPipelineConfig {
        &self.config
    }

    /// Run every stage starting from a raw CSV export.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. Data stage errors arrive as
    /// [`TrainingError::Processing`] with their own error code, e.g.
    /// `SCHEMA_MISMATCH` or `DRIFT_DETECTED`.
    pub fn run_from_csv(&mut self, source: &Path) -> Result<TrainingRunResult> {
        self.execute(Source::Csv(source.to_path_buf()))
    }

    /// Run validation, transformation and training on already split files.
    pub fn run(&mut self, ingestion: IngestionArtifact) -> Result<TrainingRunResult> {
        self.execute(Source::Ingested(ingestion))
    }

    fn execute(&mut self, source: Source) -> Result<TrainingRunResult> {
        let reporter = self.reporter.clone();
        let result = self.execute_stages(source, &reporter);

        match &result {
            Ok(run) => reporter.emit(ProgressUpdate {
                stage: TrainingStage::Complete,
                progress: 1.0,
                message: format!(
                    "Training complete. Best model: {}",
                    run.trainer.best_model_name
                ),
                current_model: Some(run.trainer.best_model_name.clone()),
                ..Default::default()
            }),
            Err(e) => {
                error!("Pipeline failed [{}]: {}", e.error_code(), e);
                reporter.stage(TrainingStage::Failed, 1.0, e.to_string());
            }
        }
        result
    }

    fn execute_stages(&mut self, source: Source, reporter: &Reporter) -> Result<TrainingRunResult> {
        let started = Instant::now();
        reporter.stage(TrainingStage::Initializing, 0.0, "Preparing run directory");

        let run = RunConfig::new(&self.config.artifact_root)?;
        info!(
            "Starting run {} in {}",
            run.run_id(),
            run.artifact_dir().display()
        );

        let ingestion = match source {
            Source::Csv(path) => {
                reporter.stage(
                    TrainingStage::DataIngestion,
                    INGESTION_PROGRESS,
                    format!("Ingesting {}", path.display()),
                );
                DataIngestion::new(self.config.ingestion_config(&run))?.initiate_from_csv(&path)?
            }
            Source::Ingested(artifact) => artifact,
        };

        reporter.stage(
            TrainingStage::DataValidation,
            VALIDATION_PROGRESS,
            "Validating schema and drift",
        );
        let validation = DataValidation::new(self.config.validation_config(&run))?
            .initiate(&ingestion)?;
        if self.config.fail_on_drift {
            validation.ensure_no_drift()?;
        } else if !validation.validation_status {
            warn!(
                "Continuing despite drift in: {}",
                validation.drifted_columns.join(", ")
            );
        }

        reporter.stage(
            TrainingStage::DataTransformation,
            TRANSFORMATION_PROGRESS,
            "Imputing missing values",
        );
        let transformation = DataTransformation::new(self.config.transformation_config(&run))?
            .initiate(&validation)?;

        reporter.stage(
            TrainingStage::ModelTraining,
            TRAINING_PROGRESS,
            "Searching candidate models",
        );
        let trainer = ModelTrainer::new(self.config.trainer_config(&run))?;
        let trainer_artifact = trainer.initiate_with_progress(
            &transformation,
            &mut self.tracker,
            |outcome, done, total| {
                let share = done as f64 / total as f64;
                reporter.emit(ProgressUpdate {
                    stage: TrainingStage::ModelTraining,
                    progress: TRAINING_PROGRESS + (1.0 - TRAINING_PROGRESS) * share * 0.95,
                    message: format!(
                        "{}: test accuracy {:.4}",
                        outcome.name, outcome.test_score
                    ),
                    current_model: Some(outcome.name.clone()),
                    models_completed: Some((done as u32, total as u32)),
                });
            },
        )?;

        let training_time_seconds = started.elapsed().as_secs_f64();
        info!(
            "Run {} finished in {:.1}s; selected {}",
            run.run_id(),
            training_time_seconds,
            trainer_artifact.best_model_name
        );

        Ok(TrainingRunResult {
            run_id: run.run_id().to_string(),
            artifact_dir: run.artifact_dir().to_path_buf(),
            ingestion,
            validation,
            transformation,
            trainer: trainer_artifact,
            training_time_seconds,
        })
    }
}

/// Builder for [`TrainingPipeline`].
///
/// # Required Configuration
///
/// - [`config()`](Self::config)
///
/// # Optional Configuration
///
/// - [`tracker()`](Self::tracker): defaults to a [`LocalTracker`] in
///   `<artifact_root>/mlruns`
/// - [`on_progress()`](Self::on_progress)
#[derive(Default)]
pub struct TrainingPipelineBuilder {
    config: Option<TrainingPipelineConfig>,
    tracker: Option<Box<dyn TrackingBackend>>,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for TrainingPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingPipelineBuilder")
            .field("config", &self.config)
            .field("tracker", &self.tracker.as_ref().map(|t| t.name().to_string()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl TrainingPipelineBuilder {
    /// Set the pipeline configuration (required).
    #[must_use]
    pub fn config(mut self, config: TrainingPipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the experiment tracking backend.
    #[must_use]
    pub fn tracker(mut self, backend: impl TrackingBackend + 'static) -> Self {
        self.tracker = Some(Box::new(backend));
        self
    }

    /// Set an already boxed tracking backend, e.g. one chosen at runtime.
    #[must_use]
    pub fn boxed_tracker(mut self, backend: Box<dyn TrackingBackend>) -> Self {
        self.tracker = Some(backend);
        self
    }

    /// Set the progress callback.
    ///
    /// The callback runs on the pipeline thread and should return quickly.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::InvalidConfig`] if no configuration was
    /// provided or the configuration is invalid.
    pub fn build(self) -> Result<TrainingPipeline> {
        let config = self.config.ok_or_else(|| {
            TrainingError::InvalidConfig("Pipeline config is required".to_string())
        })?;
        config.validate()?;

        let backend = self.tracker.unwrap_or_else(|| {
            Box::new(LocalTracker::new(
                config.artifact_root.join(DEFAULT_TRACKING_DIR),
                config.experiment_name.clone(),
            ))
        });

        Ok(TrainingPipeline {
            config,
            tracker: ExperimentTracker::from_boxed(backend),
            reporter: Reporter {
                callback: self.progress_callback,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_pipeline_builder_requires_config() {
        let err = TrainingPipeline::builder().build().unwrap_err();
        assert!(matches!(err, TrainingError::InvalidConfig(_)));
        assert!(err.to_string().contains("config is required"));
    }

    #[test]
    fn test_pipeline_builder_validates_config() {
        let config = TrainingPipelineConfig {
            cv_folds: 0,
            ..Default::default()
        };
        let err = TrainingPipeline::builder().config(config).build().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_pipeline_default_tracker_is_local() {
        let pipeline = TrainingPipeline::builder()
            .config(TrainingPipelineConfig::default())
            .build()
            .unwrap();
        assert_eq!(pipeline.tracker.backend_name(), "local");

        let debug_str = format!("{pipeline:?}");
        assert!(debug_str.contains("TrainingPipeline"));
        assert!(debug_str.contains("local"));
    }

    #[test]
    fn test_missing_source_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingPipelineConfig::builder()
            .artifact_root(dir.path().join("Artifacts"))
            .build()
            .unwrap();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stages);
        let mut pipeline = TrainingPipeline::builder()
            .config(config)
            .on_progress(move |update| seen.lock().unwrap().push(update.stage))
            .build()
            .unwrap();

        let err = pipeline
            .run_from_csv(&dir.path().join("missing.csv"))
            .unwrap_err();
        assert!(matches!(err, TrainingError::Processing(_)));

        let stages = stages.lock().unwrap();
        assert_eq!(
            *stages,
            vec![
                TrainingStage::Initializing,
                TrainingStage::DataIngestion,
                TrainingStage::Failed
            ]
        );
    }
}
