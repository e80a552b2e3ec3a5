//! Data transformation stage: KNN imputation and label normalization.
//!
//! The imputer is fit on the training features only and applied to both
//! splits. Each split is then written as an `n x (d + 1)` matrix whose last
//! column is the label remapped to `{0, 1}`.

use ndarray::{Array1, Array2, Axis, concatenate};
use polars::prelude::*;
use std::path::Path;
use tracing::{info, instrument};

use crate::artifacts::{read_bincode, read_csv, write_bincode};
use crate::config::DataTransformationConfig;
use crate::error::{ProcessingError, Result, ResultExt};
use crate::imputers::{FittedKnnImputer, KNNImputer};
use crate::types::{DataTransformationArtifact, DataValidationArtifact};
use crate::utils::target_labels;

/// The transformation stage.
#[derive(Debug, Clone)]
pub struct DataTransformation {
    config: DataTransformationConfig,
}

impl DataTransformation {
    pub fn new(config: DataTransformationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DataTransformationConfig {
        &self.config
    }

    #[instrument(skip_all, name = "data_transformation")]
    pub fn initiate(
        &self,
        validation: &DataValidationArtifact,
    ) -> Result<DataTransformationArtifact> {
        let train = read_csv(&validation.valid_train_path).context("Loading validated train split")?;
        let test = read_csv(&validation.valid_test_path).context("Loading validated test split")?;

        let target = self.config.target_column.as_str();
        let (train_features, train_labels) = split_features(&train, target)?;
        let (test_features, test_labels) = split_features(&test, target)?;

        let imputer = KNNImputer::new(self.config.imputer);
        let preprocessor = imputer.fit(&train_features).context("Fitting imputer")?;
        info!(
            "Fitted imputer on {} features (k={})",
            preprocessor.n_features(),
            preprocessor.n_neighbors()
        );

        let train_matrix = preprocessor
            .transform_frame(&train_features)
            .context("Imputing train features")?;
        let test_matrix = preprocessor
            .transform_frame(&test_features)
            .context("Imputing test features")?;

        let train_array = append_label(train_matrix, &train_labels)?;
        let test_array = append_label(test_matrix, &test_labels)?;
        info!(
            "Transformed train {:?} and test {:?}",
            train_array.dim(),
            test_array.dim()
        );

        let policy = self.config.persistence;
        let transformed_train_path =
            write_bincode(&train_array, &self.config.transformed_train_path, policy)?;
        let transformed_test_path =
            write_bincode(&test_array, &self.config.transformed_test_path, policy)?;
        let preprocessor_path = write_bincode(&preprocessor, &self.config.preprocessor_path, policy)?;

        Ok(DataTransformationArtifact {
            transformed_train_path,
            transformed_test_path,
            preprocessor_path,
        })
    }
}

/// Separate the feature columns from the remapped label column.
pub fn split_features(df: &DataFrame, target: &str) -> Result<(DataFrame, Array1<f64>)> {
    if df.column(target).is_err() {
        return Err(ProcessingError::ColumnNotFound(target.to_string()));
    }
    let labels = target_labels(df, target)?;
    let features = df.drop(target).context("Dropping target column")?;
    Ok((features, labels))
}

/// Append `labels` as the last column of `features`.
pub fn append_label(features: Array2<f64>, labels: &Array1<f64>) -> Result<Array2<f64>> {
    if features.nrows() != labels.len() {
        return Err(ProcessingError::InvalidData(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    concatenate(
        Axis(1),
        &[features.view(), labels.view().insert_axis(Axis(1))],
    )
    .map_err(|e| ProcessingError::InvalidData(e.to_string()))
}

/// Load a transformed `n x (d + 1)` array.
pub fn load_transformed_array(path: &Path) -> Result<Array2<f64>> {
    read_bincode(path).context(format!("Loading transformed array {}", path.display()))
}

/// Load the fitted preprocessor written by this stage.
pub fn load_preprocessor(path: &Path) -> Result<FittedKnnImputer> {
    read_bincode(path).context(format!("Loading preprocessor {}", path.display()))
}
