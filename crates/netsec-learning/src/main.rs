//! CLI entry point for the phishing detection training pipeline.

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use netsec_learning::{
    LocalTracker, TrackingBackend, TrainingError, TrainingPipeline, TrainingPipelineConfig,
    TrainingRunResult,
};
use netsec_processing::IngestionArtifact;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "netsec-train",
    version,
    about = "Train a phishing URL classifier from a CSV export",
    long_about = "Runs ingestion, validation, transformation and model training, \
                  writing every artifact below a timestamped run directory.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  MLFLOW_TRACKING_URI    MLflow server used for experiment tracking\n\n\
                  EXAMPLES:\n  \
                  # Full run from a raw export\n  \
                  netsec-train -i Network_Data/phisingData.csv\n\n  \
                  # Start from existing train/test files\n  \
                  netsec-train --train train.csv --test test.csv\n\n  \
                  # Abort when the splits drift apart\n  \
                  netsec-train -i data.csv --fail-on-drift"
)]
struct Args {
    /// Raw CSV export to ingest and split
    #[arg(short, long, conflicts_with_all = ["train", "test"], required_unless_present = "train")]
    input: Option<PathBuf>,

    /// Existing train split (skips ingestion; requires --test)
    #[arg(long, requires = "test")]
    train: Option<PathBuf>,

    /// Existing test split (requires --train)
    #[arg(long, requires = "train")]
    test: Option<PathBuf>,

    /// YAML pipeline configuration; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schema document listing the expected columns
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Local experiment store (default: <artifact-dir>/mlruns); takes
    /// precedence over --tracking-uri
    #[arg(long)]
    tracking_dir: Option<PathBuf>,

    /// MLflow tracking server URL
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    tracking_uri: Option<String>,

    /// Fail after validation when any column drifted
    #[arg(long)]
    fail_on_drift: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and the final result)
    #[arg(short, long)]
    quiet: bool,

    /// Print the run result as JSON on stdout instead of a summary
    ///
    /// Disables all logging.
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber. Nothing is logged in JSON mode.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // .env must be loaded before parsing so MLFLOW_TRACKING_URI can come from it
    dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    let config = build_config(&args)?;
    let mut pipeline = build_pipeline(&args, config)?;

    let result = match (&args.input, &args.train, &args.test) {
        (Some(input), _, _) => {
            if !input.exists() {
                return Err(anyhow!("Input file not found: {}", input.display()));
            }
            pipeline.run_from_csv(input)
        }
        (None, Some(train), Some(test)) => pipeline.run(IngestionArtifact {
            train_path: train.clone(),
            test_path: test.clone(),
        }),
        _ => return Err(anyhow!("Either --input or both --train and --test are required")),
    };

    match result {
        Ok(run) => print_result(&run, args.json),
        Err(e) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&e)?);
            } else {
                error!("Pipeline failed: {}", e);
            }
            Err(anyhow!("Pipeline failed [{}]: {}", e.error_code(), e))
        }
    }
}

fn build_config(args: &Args) -> Result<TrainingPipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TrainingPipelineConfig::from_yaml_file(path)?
        }
        None => TrainingPipelineConfig::default(),
    };

    if let Some(schema) = &args.schema {
        config.schema_path = schema.clone();
    }
    if let Some(root) = &args.artifact_dir {
        config.artifact_root = root.clone();
    }
    if args.fail_on_drift {
        config.fail_on_drift = true;
    }
    config.validate()?;
    Ok(config)
}

fn build_pipeline(args: &Args, config: TrainingPipelineConfig) -> Result<TrainingPipeline> {
    let mut builder = TrainingPipeline::builder();
    if let Some(backend) = build_tracker(args, &config)? {
        info!("Tracking experiments with the {} backend", backend.name());
        builder = builder.boxed_tracker(backend);
    }

    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:>3.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.as_str(),
                update.message
            );
        });
    }

    Ok(builder.config(config).build()?)
}

fn build_tracker(
    args: &Args,
    config: &TrainingPipelineConfig,
) -> Result<Option<Box<dyn TrackingBackend>>, TrainingError> {
    if let Some(dir) = &args.tracking_dir {
        return Ok(Some(Box::new(LocalTracker::new(
            dir,
            config.experiment_name.clone(),
        ))));
    }
    match args.tracking_uri.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(uri) => mlflow_tracker(uri, config).map(Some),
        None => Ok(None),
    }
}

#[cfg(feature = "mlflow")]
fn mlflow_tracker(
    uri: &str,
    config: &TrainingPipelineConfig,
) -> Result<Box<dyn TrackingBackend>, TrainingError> {
    use netsec_learning::tracking::{MlflowConfig, MlflowTracker};

    let mlflow = MlflowConfig::new(uri).with_experiment_name(config.experiment_name.clone());
    Ok(Box::new(MlflowTracker::new(mlflow)?))
}

#[cfg(not(feature = "mlflow"))]
fn mlflow_tracker(
    _uri: &str,
    _config: &TrainingPipelineConfig,
) -> Result<Box<dyn TrackingBackend>, TrainingError> {
    Err(TrainingError::InvalidConfig(
        "--tracking-uri needs the `mlflow` feature".to_string(),
    ))
}

/// Print the run result.
///
/// Uses `println!` on purpose: this is the command's output, not a log line.
fn print_result(run: &TrainingRunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    let trainer = &run.trainer;
    println!("\n{}", "=".repeat(80));
    println!("TRAINING COMPLETE - run {}", run.run_id);
    println!("{}", "=".repeat(80));
    println!("  Artifacts:   {}", run.artifact_dir.display());
    println!("  Bundle:      {}", trainer.trained_model_path.display());
    println!("  Best model:  {}", trainer.best_model_name);
    println!("  Parameters:  {}", serde_json::to_string(&trainer.best_params)?);
    println!("  Duration:    {:.1}s", run.training_time_seconds);
    if !run.validation.validation_status {
        println!(
            "  Drift:       {}",
            run.validation.drifted_columns.join(", ")
        );
    }
    println!();

    println!("{:<12} {:>10} {:>10} {:>10}", "Split", "F1", "Precision", "Recall");
    println!("{}", "-".repeat(45));
    for (split, metric) in [("train", &trainer.train_metric), ("test", &trainer.test_metric)] {
        println!(
            "{:<12} {:>10.4} {:>10.4} {:>10.4}",
            split, metric.f1_score, metric.precision_score, metric.recall_score
        );
    }
    println!();

    println!("{:<22} {:>10} {:>10}", "Candidate", "CV acc", "Test acc");
    println!("{}", "-".repeat(45));
    for candidate in &trainer.model_report {
        println!(
            "{:<22} {:>10.4} {:>10.4}",
            candidate.name, candidate.cv_score, candidate.test_score
        );
    }
    println!("{}", "=".repeat(80));
    Ok(())
}
