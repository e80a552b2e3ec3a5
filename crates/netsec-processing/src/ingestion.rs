//! Data ingestion stage: local CSV source to feature store and seeded split.

use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{info, instrument};

use crate::artifacts::{read_csv, write_csv};
use crate::config::DataIngestionConfig;
use crate::error::{ProcessingError, Result, ResultExt};
use crate::types::IngestionArtifact;

/// Column added by document-store exports; never a feature.
pub const RECORD_ID_COLUMN: &str = "_id";

/// The ingestion stage.
#[derive(Debug, Clone)]
pub struct DataIngestion {
    config: DataIngestionConfig,
}

impl DataIngestion {
    pub fn new(config: DataIngestionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DataIngestionConfig {
        &self.config
    }

    /// Copy `source` into the feature store and split it into train and test files.
    #[instrument(skip_all, name = "data_ingestion")]
    pub fn initiate_from_csv(&self, source: &Path) -> Result<IngestionArtifact> {
        let mut df = read_csv(source).context("Loading source data")?;
        if df.column(RECORD_ID_COLUMN).is_ok() {
            df = df.drop(RECORD_ID_COLUMN)?;
        }
        info!("Ingested {} rows x {} columns", df.height(), df.width());

        write_csv(&mut df, &self.config.feature_store_path, self.config.persistence)
            .context("Writing feature store")?;

        let (mut train, mut test) =
            train_test_split(&df, self.config.test_split_ratio, self.config.random_seed)?;
        info!("Split into {} train / {} test rows", train.height(), test.height());

        let train_path = write_csv(&mut train, &self.config.train_path, self.config.persistence)?;
        let test_path = write_csv(&mut test, &self.config.test_path, self.config.persistence)?;

        Ok(IngestionArtifact {
            train_path,
            test_path,
        })
    }
}

/// Shuffle rows with a seeded RNG and hold out `ceil(n * test_ratio)` of them.
pub fn train_test_split(
    df: &DataFrame,
    test_ratio: f64,
    seed: u64,
) -> Result<(DataFrame, DataFrame)> {
    let n = df.height();
    let n_test = (n as f64 * test_ratio).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(ProcessingError::InvalidData(format!(
            "cannot split {n} rows with test ratio {test_ratio}"
        )));
    }

    let mut indices: Vec<IdxSize> = (0..n as IdxSize).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    let train = df.take(&IdxCa::from_vec("idx".into(), train_idx.to_vec()))?;
    let test = df.take(&IdxCa::from_vec("idx".into(), test_idx.to_vec()))?;
    Ok((train, test))
}
