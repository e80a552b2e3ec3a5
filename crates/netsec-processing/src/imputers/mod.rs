//! Missing-value imputation.
//!
//! The imputer is fit once on the training features and the fitted instance
//! is applied unchanged to train, test and inference inputs.

mod knn;

pub use knn::{FittedKnnImputer, KNNImputer, nan_euclidean};
