use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ProcessingError, Result};

/// Output of the ingestion stage: the two split files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionArtifact {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
}

/// Output of the validation stage.
///
/// `validation_status` only reflects drift. Schema failures never produce an
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValidationArtifact {
    pub validation_status: bool,
    pub valid_train_path: PathBuf,
    pub valid_test_path: PathBuf,
    pub invalid_train_path: Option<PathBuf>,
    pub invalid_test_path: Option<PathBuf>,
    pub drift_report_path: PathBuf,
    /// Columns flagged by the drift detector, in column order.
    #[serde(default)]
    pub drifted_columns: Vec<String>,
}

impl DataValidationArtifact {
    /// Turn a recorded drift failure into a `DriftDetected` error.
    pub fn ensure_no_drift(&self) -> Result<()> {
        if self.validation_status {
            Ok(())
        } else {
            Err(ProcessingError::DriftDetected {
                columns: self.drifted_columns.clone(),
            })
        }
    }
}

/// Output of the transformation stage.
///
/// Both arrays are `n x (d + 1)` with the label in the last column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransformationArtifact {
    pub transformed_train_path: PathBuf,
    pub transformed_test_path: PathBuf,
    pub preprocessor_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(status: bool, drifted: &[&str]) -> DataValidationArtifact {
        DataValidationArtifact {
            validation_status: status,
            valid_train_path: "v/train.csv".into(),
            valid_test_path: "v/test.csv".into(),
            invalid_train_path: None,
            invalid_test_path: None,
            drift_report_path: "d/report.yaml".into(),
            drifted_columns: drifted.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_ensure_no_drift() {
        assert!(artifact(true, &[]).ensure_no_drift().is_ok());

        let err = artifact(false, &["URL_Length"]).ensure_no_drift().unwrap_err();
        assert!(matches!(err, ProcessingError::DriftDetected { columns } if columns == vec!["URL_Length"]));
    }

    #[test]
    fn test_artifact_json_shape() {
        let json = serde_json::to_value(artifact(true, &[])).unwrap();
        assert_eq!(json["validation_status"], true);
        assert!(json["invalid_train_path"].is_null());
    }
}
