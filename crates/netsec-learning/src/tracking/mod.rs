//! Experiment tracking.
//!
//! [`TrackingBackend`] abstracts the store that receives run metrics and
//! model artifacts, so the trainer does not care whether runs land in a
//! local directory or on an MLflow server.
//!
//! # Backends
//!
//! - [`LocalTracker`]: MLflow-style file store on local disk
//! - [`MlflowTracker`]: MLflow REST API (cargo feature `mlflow`)
//!
//! # Example
//!
//! ```no_run
//! use netsec_learning::tracking::{ExperimentTracker, LocalTracker};
//!
//! let tracker = ExperimentTracker::new(LocalTracker::new("mlruns", "netsec"));
//! assert_eq!(tracker.backend_name(), "local");
//! ```

pub mod local;
#[cfg(feature = "mlflow")]
pub mod mlflow;

pub use local::LocalTracker;
#[cfg(feature = "mlflow")]
pub use mlflow::{MlflowConfig, MlflowTracker};

use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::ClassificationMetric;
use crate::models::TrainedModel;

/// Artifact path under which models are logged.
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// A store for run metrics and model artifacts.
///
/// Calls arrive in the order `start_run`, any number of `log_metric` and
/// `log_model`, then `end_run`. Only one run is active at a time.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so that a pipeline holding one can
/// be moved to a worker thread.
pub trait TrackingBackend: Send + Sync {
    /// Open a new run and return its identifier.
    fn start_run(&mut self) -> Result<String>;

    /// Record one value of `key` on the active run.
    fn log_metric(&mut self, key: &str, value: f64) -> Result<()>;

    /// Store `model` under `artifact_path` on the active run.
    fn log_model(&mut self, model: &TrainedModel, artifact_path: &str) -> Result<()>;

    /// Close the active run.
    fn end_run(&mut self) -> Result<()>;

    /// Backend name for logging and debugging.
    fn name(&self) -> &str;
}

/// Records one metric set and one model per tracked run.
pub struct ExperimentTracker {
    backend: Box<dyn TrackingBackend>,
}

impl std::fmt::Debug for ExperimentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl ExperimentTracker {
    pub fn new(backend: impl TrackingBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn from_boxed(backend: Box<dyn TrackingBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Track one run: the three scores of `metric` and `model`.
    ///
    /// `end_run` is called even when logging failed. The first error wins.
    /// Returns the identifier of the tracked run.
    pub fn record(&mut self, model: &TrainedModel, metric: &ClassificationMetric) -> Result<String> {
        let run_id = self.backend.start_run()?;
        debug!("Tracking run {} on {}", run_id, self.backend.name());

        let logged = self.log_all(model, metric);
        if let Err(e) = &logged {
            warn!("Logging to run {} failed: {}", run_id, e);
        }
        let ended = self.backend.end_run();

        logged?;
        ended?;
        Ok(run_id)
    }

    fn log_all(&mut self, model: &TrainedModel, metric: &ClassificationMetric) -> Result<()> {
        for (key, value) in metric.entries() {
            self.backend.log_metric(key, value)?;
        }
        self.backend.log_model(model, MODEL_ARTIFACT_PATH)
    }
}
