//! Reading and writing of stage artifacts.
//!
//! All writers go through [`persist_bytes`], which creates parent directories
//! and applies the configured [`PersistencePolicy`]. Writers return the path
//! that was actually written so that stage artifacts never point at a file
//! that does not exist.

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::PersistencePolicy;
use crate::error::{ProcessingError, Result, ResultExt};

/// Subdirectory of the OS temp dir used by [`PersistencePolicy::TempFallback`].
pub const FALLBACK_DIR_NAME: &str = "netsec-artifacts";

// =============================================================================
// Writers
// =============================================================================

/// Write `bytes` to `path` under `policy`, returning the path actually written.
pub fn persist_bytes(path: &Path, bytes: &[u8], policy: PersistencePolicy) -> Result<PathBuf> {
    match write_file(path, bytes) {
        Ok(()) => {
            debug!("Wrote {} bytes to {}", bytes.len(), path.display());
            Ok(path.to_path_buf())
        }
        Err(source)
            if policy == PersistencePolicy::TempFallback
                && source.kind() == ErrorKind::PermissionDenied =>
        {
            let fallback = fallback_path(path);
            warn!(
                "Permission denied writing {}; saving to {} instead",
                path.display(),
                fallback.display()
            );
            write_file(&fallback, bytes).map_err(|source| ProcessingError::Persistence {
                path: fallback.clone(),
                source,
            })?;

            match fs::copy(&fallback, path) {
                Ok(_) => Ok(path.to_path_buf()),
                Err(e) => {
                    warn!(
                        "Could not copy {} back to {}: {}",
                        fallback.display(),
                        path.display(),
                        e
                    );
                    Ok(fallback)
                }
            }
        }
        Err(source) => Err(ProcessingError::Persistence {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// Temp-dir location used when `path` cannot be written.
///
/// Keeps the parent directory name so that `validated/train.csv` and
/// `ingested/train.csv` do not collide.
pub fn fallback_path(path: &Path) -> PathBuf {
    let mut fallback = std::env::temp_dir().join(FALLBACK_DIR_NAME);
    if let Some(parent) = path.parent().and_then(|p| p.file_name()) {
        fallback.push(parent);
    }
    match path.file_name() {
        Some(name) => fallback.join(name),
        None => fallback.join("artifact"),
    }
}

/// Write a frame as comma-separated CSV with a header row.
pub fn write_csv(df: &mut DataFrame, path: &Path, policy: PersistencePolicy) -> Result<PathBuf> {
    let mut buffer: Vec<u8> = Vec::new();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .with_separator(b',')
        .finish(df)
        .context(format!("Encoding CSV for {}", path.display()))?;
    persist_bytes(path, &buffer, policy)
}

/// Write any serializable value as a YAML document.
pub fn write_yaml<T: Serialize>(value: &T, path: &Path, policy: PersistencePolicy) -> Result<PathBuf> {
    let text = serde_yaml::to_string(value)?;
    persist_bytes(path, text.as_bytes(), policy)
}

/// Write any serializable value as a bincode blob.
pub fn write_bincode<T: Serialize>(
    value: &T,
    path: &Path,
    policy: PersistencePolicy,
) -> Result<PathBuf> {
    let bytes = bincode::serialize(value)?;
    persist_bytes(path, &bytes, policy)
}

// =============================================================================
// Readers
// =============================================================================

/// Read a CSV file with a header row.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.is_file() {
        return Err(ProcessingError::Io(std::io::Error::new(
            ErrorKind::NotFound,
            format!("CSV file not found: {}", path.display()),
        )));
    }

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .context(format!("Reading {}", path.display()))
}

/// Read a YAML document.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).context(format!("Reading {}", path.display()))?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Read a bincode blob.
pub fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).context(format!("Reading {}", path.display()))?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_csv_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ingested/train.csv");
        let mut df = df![
            "having_IP_Address" => [1i64, -1, 1],
            "Result" => [-1i64, 1, 1],
        ]
        .unwrap();

        let written = write_csv(&mut df, &path, PersistencePolicy::Strict).unwrap();
        assert_eq!(written, path);

        let loaded = read_csv(&path).unwrap();
        assert_eq!(loaded.shape(), (3, 2));
        assert!(loaded.equals(&df));
    }

    #[test]
    fn test_csv_empty_fields_read_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gaps.csv");
        fs::write(&path, "a,b\n1,\n2,3\n").unwrap();

        let loaded = read_csv(&path).unwrap();
        assert_eq!(loaded.column("b").unwrap().null_count(), 1);
    }

    #[test]
    fn test_read_csv_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_csv(&dir.path().join("absent.csv")).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_yaml_and_bincode_artifacts() {
        let dir = tempfile::tempdir().unwrap();

        let mut report = BTreeMap::new();
        report.insert("URL_Length".to_string(), 0.5_f64);
        let yaml_path = dir.path().join("report.yaml");
        write_yaml(&report, &yaml_path, PersistencePolicy::Strict).unwrap();
        let loaded: BTreeMap<String, f64> = read_yaml(&yaml_path).unwrap();
        assert_eq!(loaded, report);

        let matrix = array![[1.0, 0.0], [f64::NAN, 1.0]];
        let bin_path = dir.path().join("transformed/train.bin");
        write_bincode(&matrix, &bin_path, PersistencePolicy::Strict).unwrap();
        let restored: ndarray::Array2<f64> = read_bincode(&bin_path).unwrap();
        assert_eq!(restored.shape(), &[2, 2]);
        assert!(restored[[1, 0]].is_nan());
    }

    #[test]
    fn test_strict_policy_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let target = blocker.join("report.yaml");

        let err = persist_bytes(&target, b"x", PersistencePolicy::Strict).unwrap_err();
        match err {
            ProcessingError::Persistence { path, .. } => assert_eq!(path, target),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fallback_only_applies_to_permission_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let result = persist_bytes(&blocker.join("a.bin"), b"x", PersistencePolicy::TempFallback);
        assert!(matches!(result, Err(ProcessingError::Persistence { .. })));
    }

    /// Make `dir` read-only; `false` when the process can still write into it
    /// (e.g. running as root), in which case the permissions are restored.
    #[cfg(unix)]
    fn lock_dir(dir: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(dir, fs::Permissions::from_mode(0o555)).unwrap();
        let canary = dir.join(".canary");
        if fs::write(&canary, b"").is_ok() {
            fs::remove_file(&canary).unwrap();
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
            return false;
        }
        true
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_falls_back_to_temp_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // unique parent name keeps the fallback location private to this test
        let locked = dir.path().join(dir.path().file_name().unwrap());
        fs::create_dir(&locked).unwrap();
        if !lock_dir(&locked) {
            eprintln!("skipping: directory permissions are not enforced");
            return;
        }
        let target = locked.join("report.yaml");

        let err = persist_bytes(&target, b"drift: none", PersistencePolicy::Strict).unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_FAILED");
        assert!(matches!(err, ProcessingError::Persistence { ref path, .. } if *path == target));

        let written =
            persist_bytes(&target, b"drift: none", PersistencePolicy::TempFallback).unwrap();
        assert_eq!(written, fallback_path(&target));
        assert!(written.starts_with(std::env::temp_dir()));
        assert_eq!(fs::read(&written).unwrap(), b"drift: none");
        assert!(!target.exists());

        fs::remove_dir_all(written.parent().unwrap()).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_fallback_path_keeps_parent_name() {
        let path = Path::new("/run/data_validation/validated/train.csv");
        let fallback = fallback_path(path);
        assert!(fallback.starts_with(std::env::temp_dir()));
        assert!(fallback.ends_with("netsec-artifacts/validated/train.csv"));
    }
}
