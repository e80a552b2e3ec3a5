//! Model training stage.
//!
//! Consumes the transformation artifact, selects the best candidate, records
//! its train and test metrics with the experiment tracker and writes the
//! inference bundle.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use netsec_processing::{DataTransformationArtifact, load_preprocessor, load_transformed_array};
use tracing::{info, instrument, warn};

use crate::bundle::InferenceBundle;
use crate::config::ModelTrainerConfig;
use crate::error::{Result, TrainingError};
use crate::metrics::classification_score;
use crate::selection::{CandidateOutcome, ModelSelector};
use crate::tracking::ExperimentTracker;
use crate::types::ModelTrainerArtifact;

/// The model training stage.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: ModelTrainerConfig,
    selector: ModelSelector,
}

impl ModelTrainer {
    pub fn new(config: ModelTrainerConfig) -> Result<Self> {
        config.validate()?;
        let selector = ModelSelector::new(
            config.candidates.clone(),
            config.cv_folds,
            config.random_seed,
        )?;
        Ok(Self { config, selector })
    }

    pub fn config(&self) -> &ModelTrainerConfig {
        &self.config
    }

    pub fn initiate(
        &self,
        transformation: &DataTransformationArtifact,
        tracker: &mut ExperimentTracker,
    ) -> Result<ModelTrainerArtifact> {
        self.initiate_with_progress(transformation, tracker, |_, _, _| {})
    }

    /// Run the stage, calling `on_candidate(outcome, done, total)` after each
    /// candidate family is searched.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::SearchFailed`] if any candidate fails
    /// - [`TrainingError::Underperforming`] if the winner misses
    ///   `min_test_accuracy`; nothing is tracked or saved in that case
    /// - [`TrainingError::Tracking`] if the tracker rejects a run
    #[instrument(skip_all, name = "model_trainer")]
    pub fn initiate_with_progress<F>(
        &self,
        transformation: &DataTransformationArtifact,
        tracker: &mut ExperimentTracker,
        on_candidate: F,
    ) -> Result<ModelTrainerArtifact>
    where
        F: FnMut(&CandidateOutcome, usize, usize),
    {
        let train = load_transformed_array(&transformation.transformed_train_path)?;
        let test = load_transformed_array(&transformation.transformed_test_path)?;
        let (x_train, y_train) = split_xy(&train)?;
        let (x_test, y_test) = split_xy(&test)?;
        if x_train.ncols() != x_test.ncols() {
            return Err(TrainingError::InvalidData(format!(
                "train has {} features but test has {}",
                x_train.ncols(),
                x_test.ncols()
            )));
        }
        info!(
            "Training on {} rows, testing on {} rows, {} features",
            x_train.nrows(),
            x_test.nrows(),
            x_train.ncols()
        );

        let (best, model_report) =
            self.selector
                .select_with_progress(x_train, y_train, x_test, y_test, on_candidate)?;

        if let Some(required) = self.config.min_test_accuracy
            && best.test_score < required
        {
            warn!(
                "{} reached test accuracy {:.4}, below the required {:.4}",
                best.name, best.test_score, required
            );
            return Err(TrainingError::Underperforming {
                model: best.name,
                accuracy: best.test_score,
                required,
            });
        }

        let train_pred = best.model.predict(x_train)?;
        let train_metric = classification_score(y_train, train_pred.view())?;
        let test_pred = best.model.predict(x_test)?;
        let test_metric = classification_score(y_test, test_pred.view())?;
        info!(
            "{} train f1 {:.4}, test f1 {:.4}",
            best.name, train_metric.f1_score, test_metric.f1_score
        );

        let train_run = tracker.record(&best.model, &train_metric)?;
        let test_run = tracker.record(&best.model, &test_metric)?;
        info!(
            "Tracked train run {} and test run {} on {}",
            train_run,
            test_run,
            tracker.backend_name()
        );

        let preprocessor = load_preprocessor(&transformation.preprocessor_path)?;
        if preprocessor.n_features() != x_train.ncols() {
            return Err(TrainingError::InvalidData(format!(
                "preprocessor expects {} features but the arrays hold {}",
                preprocessor.n_features(),
                x_train.ncols()
            )));
        }
        let bundle = InferenceBundle::new(preprocessor, best.model);
        let trained_model_path =
            bundle.save(&self.config.trained_model_path, self.config.persistence)?;

        Ok(ModelTrainerArtifact {
            trained_model_path,
            best_model_name: best.name,
            best_params: best.best_params,
            train_metric,
            test_metric,
            model_report,
        })
    }
}

/// Split an `n x (d + 1)` array into features and the last-column label.
pub fn split_xy(array: &Array2<f64>) -> Result<(ArrayView2<'_, f64>, ArrayView1<'_, f64>)> {
    let width = array.ncols();
    if width < 2 {
        return Err(TrainingError::InvalidData(format!(
            "expected at least one feature column and a label column, got {width} column(s)"
        )));
    }
    let features = array.slice(s![.., ..width - 1]);
    let labels = array.index_axis(Axis(1), width - 1);
    Ok((features, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Criterion, MaxFeatures};
    use crate::selection::CandidateGrid;
    use crate::tracking::LocalTracker;
    use ndarray::array;
    use netsec_processing::artifacts::write_bincode;
    use netsec_processing::{ImputerConfig, KNNImputer, PersistencePolicy, RunConfig};
    use std::path::Path;

    /// Two features; the label is 1 when the first feature exceeds 5.
    fn labelled(n: usize, flip: bool) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(i, j)| {
            let a = (i % 10) as f64 + 0.5;
            match j {
                0 => a,
                1 => (i % 3) as f64,
                _ => {
                    let positive = a > 5.0;
                    if positive != flip { 1.0 } else { 0.0 }
                }
            }
        })
    }

    fn transformation(dir: &Path, train: &Array2<f64>, test: &Array2<f64>) -> DataTransformationArtifact {
        let features = train.slice(s![.., ..2]).to_owned();
        let preprocessor = KNNImputer::new(ImputerConfig::default())
            .fit_matrix(vec!["a".into(), "b".into()], features)
            .unwrap();
        let policy = PersistencePolicy::Strict;
        DataTransformationArtifact {
            transformed_train_path: write_bincode(train, &dir.join("train.bin"), policy).unwrap(),
            transformed_test_path: write_bincode(test, &dir.join("test.bin"), policy).unwrap(),
            preprocessor_path: write_bincode(&preprocessor, &dir.join("preprocessing.bin"), policy)
                .unwrap(),
        }
    }

    fn small_candidates() -> Vec<CandidateGrid> {
        vec![
            CandidateGrid::DecisionTree {
                criterion: vec![Criterion::Gini],
                max_features: vec![MaxFeatures::All],
            },
            CandidateGrid::LogisticRegression {
                c: vec![1.0],
                max_iter: vec![100],
            },
        ]
    }

    #[test]
    fn test_split_xy() {
        let array = array![[1.0, 2.0, 0.0], [3.0, 4.0, 1.0]];
        let (x, y) = split_xy(&array).unwrap();
        assert_eq!(x, array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(y, array![0.0, 1.0]);

        let narrow = array![[1.0], [0.0]];
        assert!(split_xy(&narrow).is_err());
    }

    #[test]
    fn test_trainer_produces_bundle_and_tracks_runs() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path().join("Artifacts")).unwrap();
        let artifact = transformation(dir.path(), &labelled(40, false), &labelled(20, false));

        let config = ModelTrainerConfig::new(&run)
            .with_candidates(small_candidates())
            .with_cv_folds(2);
        let trainer = ModelTrainer::new(config).unwrap();
        let mlruns = dir.path().join("mlruns");
        let mut tracker = ExperimentTracker::new(LocalTracker::new(&mlruns, "test"));

        let mut seen = Vec::new();
        let result = trainer
            .initiate_with_progress(&artifact, &mut tracker, |outcome, done, total| {
                seen.push((outcome.name.clone(), done, total));
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("Decision Tree".to_string(), 1, 2),
                ("Logistic Regression".to_string(), 2, 2)
            ]
        );
        assert_eq!(result.model_report.len(), 2);
        // the tree is listed first and reaches perfect accuracy, so it wins ties
        assert_eq!(result.best_model_name, "Decision Tree");
        assert_eq!(result.test_metric.f1_score, 1.0);
        assert!(result.trained_model_path.ends_with("model_trainer/trained_model/model.bin"));

        let bundle = InferenceBundle::load(&result.trained_model_path).unwrap();
        let probe = array![[9.5, 0.0], [0.5, 1.0]];
        assert_eq!(bundle.predict_matrix(probe.view()).unwrap(), array![1.0, 0.0]);

        let tracked_runs = std::fs::read_dir(mlruns.join("0"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_dir())
            .count();
        assert_eq!(tracked_runs, 2);
    }

    #[test]
    fn test_underperforming_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path().join("Artifacts")).unwrap();
        // the test split carries inverted labels
        let artifact = transformation(dir.path(), &labelled(40, false), &labelled(20, true));

        let config = ModelTrainerConfig::new(&run)
            .with_candidates(small_candidates())
            .with_cv_folds(2)
            .with_min_test_accuracy(Some(0.6));
        let trained_model_path = config.trained_model_path.clone();
        let trainer = ModelTrainer::new(config).unwrap();
        let mlruns = dir.path().join("mlruns");
        let mut tracker = ExperimentTracker::new(LocalTracker::new(&mlruns, "test"));

        let err = trainer.initiate(&artifact, &mut tracker).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_UNDERPERFORMING");
        assert!(!trained_model_path.exists());
        assert!(!mlruns.exists());
    }

    #[test]
    fn test_default_config_keeps_weak_winner() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path().join("Artifacts")).unwrap();
        let artifact = transformation(dir.path(), &labelled(40, false), &labelled(20, true));

        let config = ModelTrainerConfig::new(&run)
            .with_candidates(small_candidates())
            .with_cv_folds(2);
        assert_eq!(config.min_test_accuracy, None);
        let trainer = ModelTrainer::new(config).unwrap();
        let mut tracker =
            ExperimentTracker::new(LocalTracker::new(dir.path().join("mlruns"), "test"));

        let result = trainer.initiate(&artifact, &mut tracker).unwrap();
        assert!(result.trained_model_path.is_file());
        assert!((0.0..=1.0).contains(&result.test_metric.f1_score));
        assert!(result.model_report.iter().all(|c| c.test_score < 0.6));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path()).unwrap();
        let config = ModelTrainerConfig::new(&run).with_candidates(Vec::new());
        assert_eq!(
            ModelTrainer::new(config).unwrap_err().error_code(),
            "INVALID_CONFIG"
        );
    }
}
