//! Data validation stage: schema conformance followed by drift detection.
//!
//! Schema failures abort the stage. Drift does not: the report is written, the
//! validated files are written, and `validation_status = false` is recorded in
//! the artifact for the caller to act on.

mod drift;
mod schema;

pub use drift::{
    ColumnDrift, DEFAULT_DRIFT_THRESHOLD, DriftDetector, DriftReport, EXACT_PRODUCT_LIMIT,
    KsOutcome, ks_two_sample,
};
pub use schema::{SchemaSpec, SchemaValidator};

use tracing::{info, instrument, warn};

use crate::artifacts::{read_csv, write_csv, write_yaml};
use crate::config::DataValidationConfig;
use crate::error::{Result, ResultExt};
use crate::types::{DataValidationArtifact, IngestionArtifact};

/// The validation stage.
#[derive(Debug, Clone)]
pub struct DataValidation {
    config: DataValidationConfig,
    validator: SchemaValidator,
    detector: DriftDetector,
}

impl DataValidation {
    /// Build the stage, loading the schema from `config.schema_path`.
    pub fn new(config: DataValidationConfig) -> Result<Self> {
        config.validate()?;
        let schema = SchemaSpec::from_yaml_file(&config.schema_path)?;
        Ok(Self::with_schema(config, schema))
    }

    /// Build the stage with an already-loaded schema.
    pub fn with_schema(config: DataValidationConfig, schema: SchemaSpec) -> Self {
        let detector = DriftDetector::new(config.drift_threshold);
        Self {
            config,
            validator: SchemaValidator::new(schema),
            detector,
        }
    }

    pub fn config(&self) -> &DataValidationConfig {
        &self.config
    }

    #[instrument(skip_all, name = "data_validation")]
    pub fn initiate(&self, ingestion: &IngestionArtifact) -> Result<DataValidationArtifact> {
        let mut train = read_csv(&ingestion.train_path).context("Loading train split")?;
        let mut test = read_csv(&ingestion.test_path).context("Loading test split")?;
        info!(
            "Validating train {:?} and test {:?}",
            train.shape(),
            test.shape()
        );

        self.validator.ensure_column_count(&train, "train")?;
        self.validator.ensure_column_count(&test, "test")?;
        self.validator.ensure_numerical_columns(&train, "train")?;
        self.validator.ensure_numerical_columns(&test, "test")?;

        let (passed, report) = self.detector.detect(&train, &test);
        let drift_report_path = write_yaml(
            &report,
            &self.config.drift_report_path,
            self.config.persistence,
        )
        .context("Writing drift report")?;

        let drifted_columns = report.drifted_columns();
        if passed {
            info!("No drift detected across {} columns", report.len());
        } else {
            warn!(
                "Drift detected in {} of {} columns: {}",
                drifted_columns.len(),
                report.len(),
                drifted_columns.join(", ")
            );
        }

        let valid_train_path = write_csv(
            &mut train,
            &self.config.valid_train_path,
            self.config.persistence,
        )?;
        let valid_test_path = write_csv(
            &mut test,
            &self.config.valid_test_path,
            self.config.persistence,
        )?;

        Ok(DataValidationArtifact {
            validation_status: passed,
            valid_train_path,
            valid_test_path,
            invalid_train_path: None,
            invalid_test_path: None,
            drift_report_path,
            drifted_columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::read_yaml;
    use crate::config::RunConfig;
    use crate::error::ProcessingError;
    use polars::prelude::*;

    fn setup(
        train: &mut DataFrame,
        test: &mut DataFrame,
    ) -> (tempfile::TempDir, RunConfig, IngestionArtifact) {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path().join("Artifacts")).unwrap();
        let train_path = dir.path().join("train.csv");
        let test_path = dir.path().join("test.csv");
        crate::artifacts::write_csv(train, &train_path, Default::default()).unwrap();
        crate::artifacts::write_csv(test, &test_path, Default::default()).unwrap();
        (
            dir,
            run,
            IngestionArtifact {
                train_path,
                test_path,
            },
        )
    }

    fn schema() -> SchemaSpec {
        SchemaSpec::new(
            vec!["a".into(), "b".into(), "Result".into()],
            vec!["a".into(), "b".into()],
        )
    }

    #[test]
    fn test_passing_validation_writes_files() {
        let mut train = df![
            "a" => [1i64, -1, 1, 0],
            "b" => [0i64, 1, 1, -1],
            "Result" => [1i64, -1, 1, -1],
        ]
        .unwrap();
        let mut test = train.clone();
        let (_dir, run, ingestion) = setup(&mut train, &mut test);

        let stage = DataValidation::with_schema(DataValidationConfig::new(&run), schema());
        let artifact = stage.initiate(&ingestion).unwrap();

        assert!(artifact.validation_status);
        assert!(artifact.valid_train_path.is_file());
        assert!(artifact.valid_test_path.is_file());
        assert!(artifact.invalid_train_path.is_none());

        let report: DriftReport = read_yaml(&artifact.drift_report_path).unwrap();
        assert_eq!(report.len(), 3);
        assert!(report.passed());
    }

    #[test]
    fn test_drift_is_recorded_not_fatal() {
        let mut train = df![
            "a" => [0i64; 20],
            "b" => [1i64; 20],
            "Result" => [1i64; 20],
        ]
        .unwrap();
        let mut test = df![
            "a" => [1i64; 20],
            "b" => [1i64; 20],
            "Result" => [1i64; 20],
        ]
        .unwrap();
        let (_dir, run, ingestion) = setup(&mut train, &mut test);

        let stage = DataValidation::with_schema(DataValidationConfig::new(&run), schema());
        let artifact = stage.initiate(&ingestion).unwrap();

        assert!(!artifact.validation_status);
        assert_eq!(artifact.drifted_columns, vec!["a".to_string()]);
        assert!(artifact.valid_train_path.is_file());
        assert!(artifact.ensure_no_drift().unwrap_err().is_drift());
    }

    #[test]
    fn test_schema_mismatch_on_test_split_is_fatal() {
        let mut train = df![
            "a" => [1i64, 0],
            "b" => [0i64, 1],
            "Result" => [1i64, -1],
        ]
        .unwrap();
        let mut test = df![
            "a" => [1i64, 0],
            "Result" => [1i64, -1],
        ]
        .unwrap();
        let (_dir, run, ingestion) = setup(&mut train, &mut test);

        let config = DataValidationConfig::new(&run);
        let report_path = config.drift_report_path.clone();
        let stage = DataValidation::with_schema(config, schema());

        match stage.initiate(&ingestion).unwrap_err() {
            ProcessingError::SchemaMismatch { dataset, .. } => assert_eq!(dataset, "test"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!report_path.exists());
    }

    #[test]
    fn test_missing_schema_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::new(dir.path()).unwrap();
        let config = DataValidationConfig::new(&run).with_schema_path(dir.path().join("nope.yaml"));

        let err = DataValidation::new(config).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_LOAD_FAILED");
    }
}
