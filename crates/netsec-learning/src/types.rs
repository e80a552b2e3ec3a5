//! Common types used throughout the netsec-learning crate.
//!
//! This module defines the artifacts and reports returned by the training
//! stage and the pipeline driver.
//!
//! # Overview
//!
//! - [`CandidateScore`]: Scores of one searched candidate family
//! - [`ModelReport`]: Scores of every candidate, in search order
//! - [`ModelTrainerArtifact`]: Output of the [`ModelTrainer`](crate::ModelTrainer) stage
//! - [`TrainingRunResult`]: Every stage artifact of one
//!   [`TrainingPipeline::run()`](crate::TrainingPipeline::run)
//!
//! # Example
//!
//! ```ignore
//! let result = pipeline.run_from_csv("Network_Data/phisingData.csv".as_ref())?;
//!
//! println!("Best model: {}", result.trainer.best_model_name);
//! println!("Test F1: {:.3}", result.trainer.test_metric.f1_score);
//!
//! for candidate in &result.trainer.model_report {
//!     println!("{}: {:.3}", candidate.name, candidate.test_score);
//! }
//! ```

use netsec_processing::{DataTransformationArtifact, DataValidationArtifact, IngestionArtifact};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::metrics::ClassificationMetric;
use crate::models::Hyperparameters;

/// Scores of one candidate family after its grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Display name of the family (e.g., "Random Forest").
    pub name: String,

    /// The configuration with the best cross-validation accuracy.
    pub hyperparameters: Hyperparameters,

    /// Mean stratified k-fold accuracy of that configuration.
    pub cv_score: f64,

    /// Accuracy on the held-out test split after refitting on the full
    /// training split.
    ///
    /// This is the score used to pick the overall winner.
    pub test_score: f64,
}

/// Candidate scores in search order.
pub type ModelReport = Vec<CandidateScore>;

/// Output of the model training stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ModelTrainerArtifact {
    /// Location of the serialized [`InferenceBundle`](crate::InferenceBundle).
    pub trained_model_path: PathBuf,

    /// Display name of the selected family.
    pub best_model_name: String,

    /// Hyperparameters of the selected configuration.
    pub best_params: Hyperparameters,

    /// Metrics of the selected model on the training split.
    pub train_metric: ClassificationMetric,

    /// Metrics of the selected model on the test split.
    pub test_metric: ClassificationMetric,

    /// Scores of every candidate.
    pub model_report: ModelReport,
}

/// Artifacts of every stage of one pipeline run.
///
/// Returned by [`TrainingPipeline::run()`](crate::TrainingPipeline::run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TrainingRunResult {
    /// Timestamped identifier of the run.
    pub run_id: String,

    /// Root directory holding every artifact of the run.
    pub artifact_dir: PathBuf,

    pub ingestion: IngestionArtifact,
    pub validation: DataValidationArtifact,
    pub transformation: DataTransformationArtifact,
    pub trainer: ModelTrainerArtifact,

    /// Wall-clock time from the first stage to the last, in seconds.
    pub training_time_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_score_serialization() {
        let score = CandidateScore {
            name: "Random Forest".to_string(),
            hyperparameters: [("n_estimators".to_string(), json!(100))].into_iter().collect(),
            cv_score: 0.9,
            test_score: 0.92,
        };

        let value = serde_json::to_value(&score).unwrap();
        assert_eq!(value["name"], json!("Random Forest"));
        assert_eq!(value["hyperparameters"]["n_estimators"], json!(100));

        let back: CandidateScore = serde_json::from_value(value).unwrap();
        assert_eq!(back, score);
    }

    #[test]
    fn test_trainer_artifact_yaml() {
        let metric = ClassificationMetric {
            f1_score: 0.5,
            precision_score: 0.5,
            recall_score: 0.5,
        };
        let artifact = ModelTrainerArtifact {
            trained_model_path: PathBuf::from("model_trainer/trained_model/model.bin"),
            best_model_name: "AdaBoost".to_string(),
            best_params: Hyperparameters::new(),
            train_metric: metric,
            test_metric: metric,
            model_report: Vec::new(),
        };
        let yaml = serde_yaml::to_string(&artifact).unwrap();
        assert!(yaml.contains("best_model_name: AdaBoost"));
        let back: ModelTrainerArtifact = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, artifact);
    }
}
