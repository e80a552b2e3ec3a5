//! Inference bundle: the fitted preprocessor and the selected model together.
//!
//! This module provides [`InferenceBundle`], which applies the exact
//! imputation fitted during training before handing rows to the model. It is
//! the single artifact needed to score new data.
//!
//! - **Prediction** via [`predict()`](InferenceBundle::predict) for raw frames
//!   and [`predict_matrix()`](InferenceBundle::predict_matrix) for numeric input
//! - **Serialization** via [`save()`](InferenceBundle::save),
//!   [`load()`](InferenceBundle::load), [`to_bytes()`](InferenceBundle::to_bytes)
//!   and [`from_bytes()`](InferenceBundle::from_bytes)
//!
//! Neither component is ever re-fitted.
//!
//! # Example
//!
//! ```rust,ignore
//! use netsec_learning::InferenceBundle;
//! use polars::prelude::*;
//!
//! let bundle = InferenceBundle::load("model_trainer/trained_model/model.bin".as_ref())?;
//! let frame = CsvReadOptions::default()
//!     .try_into_reader_with_file_path(Some("new_urls.csv".into()))?
//!     .finish()?;
//!
//! let labels = bundle.predict(&frame)?;
//! println!("{} of {} flagged", labels.sum(), labels.len());
//! ```

use ndarray::{Array1, ArrayView2};
use netsec_processing::artifacts::{persist_bytes, read_bincode};
use netsec_processing::{FittedKnnImputer, PersistencePolicy};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, TrainingError};
use crate::models::TrainedModel;

/// A fitted preprocessor plus a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceBundle {
    preprocessor: FittedKnnImputer,
    model: TrainedModel,
}

impl InferenceBundle {
    pub fn new(preprocessor: FittedKnnImputer, model: TrainedModel) -> Self {
        Self {
            preprocessor,
            model,
        }
    }

    pub fn preprocessor(&self) -> &FittedKnnImputer {
        &self.preprocessor
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    /// Feature columns expected by [`predict()`](Self::predict), in fit order.
    pub fn feature_names(&self) -> &[String] {
        self.preprocessor.feature_names()
    }

    /// Impute then classify every row of `features`, preserving row order.
    ///
    /// `features` must hold exactly the fit-time feature columns; their order
    /// does not matter.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Inference`] if a column is missing, extra or
    /// not numeric.
    pub fn predict(&self, features: &DataFrame) -> Result<Array1<f64>> {
        let matrix = self
            .preprocessor
            .transform_frame(features)
            .map_err(|e| TrainingError::Inference(e.to_string()))?;
        self.classify(matrix.view())
    }

    /// Impute then classify a numeric matrix whose missing cells are `NaN`.
    ///
    /// Columns must be in [`feature_names()`](Self::feature_names) order.
    pub fn predict_matrix(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
        let matrix = self
            .preprocessor
            .transform(features)
            .map_err(|e| TrainingError::Inference(e.to_string()))?;
        self.classify(matrix.view())
    }

    fn classify(&self, matrix: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.model
            .predict(matrix)
            .map_err(|e| TrainingError::Inference(e.to_string()))
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes produced by [`to_bytes()`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Write the bundle as one binary blob; returns the path actually written.
    pub fn save(&self, path: &Path, policy: PersistencePolicy) -> Result<PathBuf> {
        let written = persist_bytes(path, &self.to_bytes()?, policy)?;
        info!(
            "Saved {} inference bundle to {}",
            self.model.family(),
            written.display()
        );
        Ok(written)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_bincode(path)?)
    }
}
