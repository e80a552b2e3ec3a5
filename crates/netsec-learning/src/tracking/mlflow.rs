//! MLflow tracking server backend.
//!
//! Talks to the MLflow REST API (`/api/2.0/mlflow/...`) with a blocking
//! client. Models are uploaded through the server's artifact proxy
//! (`/api/2.0/mlflow-artifacts/artifacts/...`), so the server must run with
//! artifact serving enabled.

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::TrackingBackend;
use crate::config::{DEFAULT_EXPERIMENT_NAME, MODEL_FILE_NAME};
use crate::error::{Result, TrainingError};
use crate::models::TrainedModel;

/// Environment variable read by the CLI for the server address.
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:/";

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: RunPayload,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
}

/// Connection settings of the MLflow backend.
#[derive(Debug, Clone)]
pub struct MlflowConfig {
    /// Server base URL, e.g. `http://localhost:5000`.
    pub tracking_uri: String,
    pub experiment_name: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl MlflowConfig {
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into().trim_end_matches('/').to_string(),
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.tracking_uri, endpoint)
    }

    /// Proxy URL for a file below a run's artifact root.
    fn artifact_url(&self, artifact_root: &str, relative: &str) -> String {
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.tracking_uri,
            artifact_root.trim_matches('/'),
            relative.trim_matches('/')
        )
    }
}

#[derive(Debug)]
struct ActiveRun {
    run_id: String,
    /// Artifact root relative to the proxy, e.g. `1/<run_id>/artifacts`.
    artifact_root: String,
}

/// Tracks runs on an MLflow server.
///
/// # Example
///
/// ```rust,ignore
/// use netsec_learning::tracking::{ExperimentTracker, MlflowConfig, MlflowTracker};
///
/// let config = MlflowConfig::new("http://localhost:5000").with_experiment_name("phishing");
/// let tracker = ExperimentTracker::new(MlflowTracker::new(config)?);
/// ```
pub struct MlflowTracker {
    config: MlflowConfig,
    client: Client,
    experiment_id: Option<String>,
    active: Option<ActiveRun>,
}

impl std::fmt::Debug for MlflowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowTracker")
            .field("config", &self.config)
            .field("experiment_id", &self.experiment_id)
            .finish()
    }
}

impl MlflowTracker {
    /// Create a tracker. No request is sent until the first run starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: MlflowConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            experiment_id: None,
            active: None,
        })
    }

    pub fn config(&self) -> &MlflowConfig {
        &self.config
    }

    fn experiment_id(&mut self) -> Result<String> {
        if let Some(id) = &self.experiment_id {
            return Ok(id.clone());
        }

        let response = self
            .client
            .get(self.config.api_url("experiments/get-by-name"))
            .query(&[("experiment_name", self.config.experiment_name.as_str())])
            .send()?;

        let id = if response.status() == StatusCode::NOT_FOUND {
            let response = self
                .client
                .post(self.config.api_url("experiments/create"))
                .json(&json!({ "name": self.config.experiment_name }))
                .send()?;
            let created: CreateExperimentResponse = check(response)?.json()?;
            info!(
                "Created MLflow experiment '{}' with id {}",
                self.config.experiment_name, created.experiment_id
            );
            created.experiment_id
        } else {
            let found: ExperimentResponse = check(response)?.json()?;
            found.experiment.experiment_id
        };

        self.experiment_id = Some(id.clone());
        Ok(id)
    }

    fn active_run(&self) -> Result<&ActiveRun> {
        self.active
            .as_ref()
            .ok_or_else(|| TrainingError::Tracking("no active run".to_string()))
    }
}

/// Turn a non-success status into a tracking error carrying the body.
fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(TrainingError::Tracking(format!(
        "MLflow API error {status}: {body}"
    )))
}

/// Artifact root of a run as seen by the artifact proxy.
fn proxy_artifact_root(artifact_uri: Option<&str>, experiment_id: &str, run_id: &str) -> String {
    match artifact_uri.and_then(|uri| uri.strip_prefix(ARTIFACT_SCHEME)) {
        Some(rest) => rest.trim_matches('/').to_string(),
        None => format!("{experiment_id}/{run_id}/artifacts"),
    }
}

impl TrackingBackend for MlflowTracker {
    fn start_run(&mut self) -> Result<String> {
        if let Some(run) = &self.active {
            return Err(TrainingError::Tracking(format!(
                "run {} is still active",
                run.run_id
            )));
        }

        let experiment_id = self.experiment_id()?;
        let response = self
            .client
            .post(self.config.api_url("runs/create"))
            .json(&json!({
                "experiment_id": experiment_id,
                "start_time": Utc::now().timestamp_millis(),
            }))
            .send()?;
        let created: CreateRunResponse = check(response)?.json()?;
        let info = created.run.info;

        let artifact_root =
            proxy_artifact_root(info.artifact_uri.as_deref(), &experiment_id, &info.run_id);
        debug!("Started MLflow run {}", info.run_id);

        self.active = Some(ActiveRun {
            run_id: info.run_id.clone(),
            artifact_root,
        });
        Ok(info.run_id)
    }

    fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        let run = self.active_run()?;
        let response = self
            .client
            .post(self.config.api_url("runs/log-metric"))
            .json(&json!({
                "run_id": run.run_id,
                "key": key,
                "value": value,
                "timestamp": Utc::now().timestamp_millis(),
                "step": 0,
            }))
            .send()?;
        check(response)?;
        Ok(())
    }

    fn log_model(&mut self, model: &TrainedModel, artifact_path: &str) -> Result<()> {
        let run = self.active_run()?;
        let bytes = bincode::serialize(model)?;
        let url = self.config.artifact_url(
            &run.artifact_root,
            &format!("{artifact_path}/{MODEL_FILE_NAME}"),
        );

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()?;
        check(response)?;
        debug!("Uploaded {} model to {}", model.family(), url);
        Ok(())
    }

    fn end_run(&mut self) -> Result<()> {
        let Some(run) = self.active.take() else {
            return Err(TrainingError::Tracking("no active run".to_string()));
        };
        let response = self
            .client
            .post(self.config.api_url("runs/update"))
            .json(&json!({
                "run_id": run.run_id,
                "status": "FINISHED",
                "end_time": Utc::now().timestamp_millis(),
            }))
            .send()?;
        check(response)?;
        debug!("Finished MLflow run {}", run.run_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "mlflow"
    }
}
