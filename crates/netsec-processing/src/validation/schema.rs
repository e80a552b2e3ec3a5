//! Schema document loading and conformance checks.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::error::{ProcessingError, Result};

/// One entry of the `columns` list: a bare name or a `name: dtype` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ColumnEntry {
    Name(String),
    Typed(BTreeMap<String, serde_yaml::Value>),
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    columns: Vec<ColumnEntry>,
    #[serde(default)]
    numerical_columns: Vec<String>,
}

/// Declared shape of the ingested datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Declared columns; only the count is enforced.
    pub columns: Vec<String>,
    /// Columns that must be present by name.
    pub numerical_columns: Vec<String>,
}

impl SchemaSpec {
    pub fn new(columns: Vec<String>, numerical_columns: Vec<String>) -> Self {
        Self {
            columns,
            numerical_columns,
        }
    }

    /// Load a schema from a YAML document with `columns` and `numerical_columns` keys.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ProcessingError::SchemaLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            ProcessingError::SchemaLoad { reason, .. } => ProcessingError::SchemaLoad {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse a schema from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawSchema = serde_yaml::from_str(text).map_err(|e| ProcessingError::SchemaLoad {
            path: Default::default(),
            reason: e.to_string(),
        })?;

        let mut columns = Vec::with_capacity(raw.columns.len());
        for entry in raw.columns {
            match entry {
                ColumnEntry::Name(name) => columns.push(name),
                ColumnEntry::Typed(map) if map.len() == 1 => {
                    columns.extend(map.into_keys());
                }
                ColumnEntry::Typed(map) => {
                    return Err(ProcessingError::SchemaLoad {
                        path: Default::default(),
                        reason: format!(
                            "column entry must have exactly one key, found {}",
                            map.len()
                        ),
                    });
                }
            }
        }

        Ok(Self {
            columns,
            numerical_columns: raw.numerical_columns,
        })
    }

    pub fn expected_column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Checks frames against a [`SchemaSpec`].
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: SchemaSpec,
}

impl SchemaValidator {
    pub fn new(schema: SchemaSpec) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    /// True iff the frame has exactly as many columns as the schema declares.
    pub fn validate_columns(&self, frame: &DataFrame) -> bool {
        let expected = self.schema.expected_column_count();
        let actual = frame.width();
        info!("Expected columns: {}", expected);
        info!("Actual columns: {}", actual);
        expected == actual
    }

    /// Required numerical columns absent from the frame, in schema order.
    pub fn missing_numerical_columns(&self, frame: &DataFrame) -> Vec<String> {
        let present = frame.get_column_names();
        self.schema
            .numerical_columns
            .iter()
            .filter(|name| !present.iter().any(|p| p.as_str() == name.as_str()))
            .cloned()
            .collect()
    }

    /// True iff every required numerical column is present.
    pub fn validate_numerical_columns(&self, frame: &DataFrame) -> bool {
        let missing = self.missing_numerical_columns(frame);
        if !missing.is_empty() {
            error!("Missing numerical columns: {:?}", missing);
            return false;
        }
        true
    }

    /// Fail with `SchemaMismatch` unless the column count matches.
    pub fn ensure_column_count(&self, frame: &DataFrame, dataset: &str) -> Result<()> {
        if self.validate_columns(frame) {
            return Ok(());
        }
        Err(ProcessingError::SchemaMismatch {
            dataset: dataset.to_string(),
            reason: format!(
                "expected {} columns, found {}",
                self.schema.expected_column_count(),
                frame.width()
            ),
            missing_columns: Vec::new(),
        })
    }

    /// Fail with `SchemaMismatch` listing every missing numerical column.
    pub fn ensure_numerical_columns(&self, frame: &DataFrame, dataset: &str) -> Result<()> {
        if self.validate_numerical_columns(frame) {
            return Ok(());
        }
        let missing = self.missing_numerical_columns(frame);
        Err(ProcessingError::SchemaMismatch {
            dataset: dataset.to_string(),
            reason: format!("missing numerical columns: {}", missing.join(", ")),
            missing_columns: missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    const SCHEMA_YAML: &str = r#"
columns:
  - having_IP_Address: int64
  - URL_Length: int64
  - Result: int64
numerical_columns:
  - having_IP_Address
  - URL_Length
  - Result
"#;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(SchemaSpec::from_yaml_str(SCHEMA_YAML).unwrap())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn test_parse_typed_columns() {
        let schema = SchemaSpec::from_yaml_str(SCHEMA_YAML).unwrap();
        assert_eq!(
            schema.columns,
            vec!["having_IP_Address", "URL_Length", "Result"]
        );
        assert_eq!(schema.numerical_columns.len(), 3);
    }

    #[test]
    fn test_parse_plain_column_names() {
        let schema = SchemaSpec::from_yaml_str("columns: [a, b]\n").unwrap();
        assert_eq!(schema.columns, vec!["a", "b"]);
        assert!(schema.numerical_columns.is_empty());
    }

    #[test]
    fn test_missing_file_is_schema_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        let err = SchemaSpec::from_yaml_file(&path).unwrap_err();
        assert!(matches!(err, ProcessingError::SchemaLoad { path: p, .. } if p == path));
    }

    #[test]
    fn test_malformed_document_is_schema_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        fs::write(&path, "numerical_columns: [a]\n").unwrap();
        let err = SchemaSpec::from_yaml_file(&path).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_LOAD_FAILED");
    }

    #[test]
    fn test_multi_key_column_entry_rejected() {
        let err = SchemaSpec::from_yaml_str("columns:\n  - {a: int64, b: int64}\n").unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_LOAD_FAILED");
    }

    // ========================================================================
    // Checks
    // ========================================================================

    #[test]
    fn test_conforming_frame_passes_both_checks() {
        let df = df![
            "having_IP_Address" => [1i64, -1],
            "URL_Length" => [0i64, 1],
            "Result" => [1i64, -1],
        ]
        .unwrap();

        let v = validator();
        assert_eq!(
            (v.validate_columns(&df), v.validate_numerical_columns(&df)),
            (true, true)
        );
    }

    #[test]
    fn test_column_count_mismatch() {
        let df = df!["having_IP_Address" => [1i64], "Result" => [1i64]].unwrap();
        let v = validator();
        assert!(!v.validate_columns(&df));

        let err = v.ensure_column_count(&df, "train").unwrap_err();
        assert!(err.to_string().contains("expected 3 columns, found 2"));
    }

    #[test]
    fn test_reports_exactly_the_missing_columns() {
        let df = df![
            "having_IP_Address" => [1i64],
            "Other" => [1i64],
            "Result" => [1i64],
        ]
        .unwrap();
        let v = validator();

        assert!(v.validate_columns(&df));
        assert_eq!(v.missing_numerical_columns(&df), vec!["URL_Length"]);

        match v.ensure_numerical_columns(&df, "test").unwrap_err() {
            ProcessingError::SchemaMismatch {
                dataset,
                missing_columns,
                ..
            } => {
                assert_eq!(dataset, "test");
                assert_eq!(missing_columns, vec!["URL_Length"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
