//! MLflow-style file store on local disk.
//!
//! Layout below the store root:
//!
//! ```text
//! <root>/<experiment_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/metrics/<key>
//! <root>/<experiment_id>/<run_id>/artifacts/<artifact_path>/model.bin
//! ```
//!
//! Each metric file holds one `"<timestamp_ms> <value> <step>"` line per
//! logged value. Experiments are numbered from 0 in creation order and found
//! again by name.

use chrono::Utc;
use netsec_processing::PersistencePolicy;
use netsec_processing::artifacts::{read_yaml, write_bincode, write_yaml};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::TrackingBackend;
use crate::config::MODEL_FILE_NAME;
use crate::error::{Result, TrainingError};
use crate::models::TrainedModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExperimentMeta {
    experiment_id: String,
    name: String,
    artifact_location: PathBuf,
    lifecycle_stage: String,
    creation_time: i64,
}

/// Status of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
}

/// The `meta.yaml` of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub experiment_id: String,
    pub status: RunStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub artifact_uri: PathBuf,
    pub lifecycle_stage: String,
}

#[derive(Debug)]
struct ActiveRun {
    dir: PathBuf,
    meta: RunMeta,
}

/// Tracks runs into a directory tree readable by `mlflow ui --backend-store-uri`.
#[derive(Debug)]
pub struct LocalTracker {
    root: PathBuf,
    experiment_name: String,
    experiment_id: Option<String>,
    active: Option<ActiveRun>,
}

impl LocalTracker {
    pub fn new(root: impl Into<PathBuf>, experiment_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            experiment_name: experiment_name.into(),
            experiment_id: None,
            active: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the run with `run_id` in this tracker's experiment.
    pub fn run_dir(&mut self, run_id: &str) -> Result<PathBuf> {
        let experiment_id = self.experiment_id()?;
        Ok(self.root.join(experiment_id).join(run_id))
    }

    /// Read back the metadata of a tracked run.
    pub fn run_meta(&mut self, run_id: &str) -> Result<RunMeta> {
        let dir = self.run_dir(run_id)?;
        Ok(read_yaml(&dir.join("meta.yaml"))?)
    }

    /// Resolve the experiment by name, creating it on first use.
    fn experiment_id(&mut self) -> Result<String> {
        if let Some(id) = &self.experiment_id {
            return Ok(id.clone());
        }

        fs::create_dir_all(&self.root)?;
        let mut next_id = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };
            next_id = next_id.max(id + 1);

            let meta_path = entry.path().join("meta.yaml");
            if meta_path.is_file() {
                let meta: ExperimentMeta = read_yaml(&meta_path)?;
                if meta.name == self.experiment_name {
                    self.experiment_id = Some(meta.experiment_id.clone());
                    return Ok(meta.experiment_id);
                }
            }
        }

        let id = next_id.to_string();
        let dir = self.root.join(&id);
        let meta = ExperimentMeta {
            experiment_id: id.clone(),
            name: self.experiment_name.clone(),
            artifact_location: dir.clone(),
            lifecycle_stage: "active".to_string(),
            creation_time: Utc::now().timestamp_millis(),
        };
        write_yaml(&meta, &dir.join("meta.yaml"), PersistencePolicy::Strict)?;
        info!("Created experiment '{}' with id {}", self.experiment_name, id);

        self.experiment_id = Some(id.clone());
        Ok(id)
    }

    fn active_run(&self) -> Result<&ActiveRun> {
        self.active
            .as_ref()
            .ok_or_else(|| TrainingError::Tracking("no active run".to_string()))
    }
}

impl TrackingBackend for LocalTracker {
    fn start_run(&mut self) -> Result<String> {
        if let Some(run) = &self.active {
            return Err(TrainingError::Tracking(format!(
                "run {} is still active",
                run.meta.run_id
            )));
        }

        let experiment_id = self.experiment_id()?;
        let run_id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&experiment_id).join(&run_id);
        fs::create_dir_all(dir.join("metrics"))?;

        let meta = RunMeta {
            run_id: run_id.clone(),
            experiment_id,
            status: RunStatus::Running,
            start_time: Utc::now().timestamp_millis(),
            end_time: None,
            artifact_uri: dir.join("artifacts"),
            lifecycle_stage: "active".to_string(),
        };
        write_yaml(&meta, &dir.join("meta.yaml"), PersistencePolicy::Strict)?;
        debug!("Started local run {}", run_id);

        self.active = Some(ActiveRun { dir, meta });
        Ok(run_id)
    }

    fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        let run = self.active_run()?;
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(TrainingError::Tracking(format!("invalid metric key '{key}'")));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run.dir.join("metrics").join(key))?;
        writeln!(file, "{} {} 0", Utc::now().timestamp_millis(), value)?;
        Ok(())
    }

    fn log_model(&mut self, model: &TrainedModel, artifact_path: &str) -> Result<()> {
        let run = self.active_run()?;
        let path = run.meta.artifact_uri.join(artifact_path).join(MODEL_FILE_NAME);
        write_bincode(model, &path, PersistencePolicy::Strict)?;
        debug!("Logged {} model to {}", model.family(), path.display());
        Ok(())
    }

    fn end_run(&mut self) -> Result<()> {
        let Some(mut run) = self.active.take() else {
            return Err(TrainingError::Tracking("no active run".to_string()));
        };
        run.meta.status = RunStatus::Finished;
        run.meta.end_time = Some(Utc::now().timestamp_millis());
        write_yaml(&run.meta, &run.dir.join("meta.yaml"), PersistencePolicy::Strict)?;
        debug!("Finished local run {}", run.meta.run_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ClassificationMetric;
    use crate::models::{LogisticRegressionParams, ModelSpec};
    use crate::tracking::ExperimentTracker;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn model() -> TrainedModel {
        let x = array![[0.0], [0.4], [1.0], [1.6]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        ModelSpec::LogisticRegression(LogisticRegressionParams::default())
            .fit(x.view(), y.view(), 0)
            .unwrap()
    }

    #[test]
    fn test_run_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = LocalTracker::new(dir.path(), "phishing");

        let run_id = tracker.start_run().unwrap();
        tracker.log_metric("f1_score", 0.75).unwrap();
        tracker.log_metric("f1_score", 0.8).unwrap();
        tracker.log_model(&model(), "model").unwrap();
        tracker.end_run().unwrap();

        let run_dir = dir.path().join("0").join(&run_id);
        assert!(dir.path().join("0").join("meta.yaml").is_file());
        assert!(run_dir.join("artifacts").join("model").join("model.bin").is_file());

        let lines: Vec<String> = fs::read_to_string(run_dir.join("metrics").join("f1_score"))
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split(' ').collect();
        assert_eq!(fields.len(), 3);
        assert!(fields[0].parse::<i64>().is_ok());
        assert_eq!(fields[1], "0.8");
        assert_eq!(fields[2], "0");

        let meta = tracker.run_meta(&run_id).unwrap();
        assert_eq!(meta.status, RunStatus::Finished);
        assert!(meta.end_time.is_some());
    }

    #[test]
    fn test_logged_model_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = LocalTracker::new(dir.path(), "phishing");
        let original = model();

        let run_id = tracker.start_run().unwrap();
        tracker.log_model(&original, "model").unwrap();
        tracker.end_run().unwrap();

        let path = tracker.run_dir(&run_id).unwrap().join("artifacts/model/model.bin");
        let restored: TrainedModel = netsec_processing::artifacts::read_bincode(&path).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_experiments_are_found_by_name() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = LocalTracker::new(dir.path(), "a");
        first.start_run().unwrap();
        first.end_run().unwrap();

        let mut second = LocalTracker::new(dir.path(), "b");
        let run_b = second.start_run().unwrap();
        second.end_run().unwrap();
        assert!(dir.path().join("1").join(&run_b).is_dir());

        let mut again = LocalTracker::new(dir.path(), "a");
        let run_a = again.start_run().unwrap();
        again.end_run().unwrap();
        assert!(dir.path().join("0").join(&run_a).is_dir());
    }

    #[test]
    fn test_calls_outside_a_run_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = LocalTracker::new(dir.path(), "phishing");

        assert_eq!(
            tracker.log_metric("f1_score", 1.0).unwrap_err().error_code(),
            "TRACKING_FAILED"
        );
        assert!(tracker.end_run().is_err());

        tracker.start_run().unwrap();
        assert!(tracker.start_run().is_err());
        assert!(tracker.log_metric("../escape", 1.0).is_err());
    }

    #[test]
    fn test_tracker_records_two_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ExperimentTracker::new(LocalTracker::new(dir.path(), "phishing"));
        let metric = ClassificationMetric {
            f1_score: 1.0,
            precision_score: 1.0,
            recall_score: 1.0,
        };

        let train_run = tracker.record(&model(), &metric).unwrap();
        let test_run = tracker.record(&model(), &metric).unwrap();
        assert_ne!(train_run, test_run);

        let runs = fs::read_dir(dir.path().join("0"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_dir())
            .count();
        assert_eq!(runs, 2);
    }
}
