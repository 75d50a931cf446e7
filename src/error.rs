//! Error types for model building and scoring

use std::time::Duration;
use thiserror::Error;

/// Corpus problems detected while building the model. Fatal to the build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("failed to read corpus: {0}")]
    Read(String),

    #[error("required column `{0}` is missing from the corpus")]
    MissingColumn(String),

    #[error("column `{0}` contains no numeric values")]
    NonNumericColumn(String),

    #[error("row {row}: label `{value}` is not a binary class")]
    InvalidLabel { row: usize, value: String },

    #[error("corpus has no rows")]
    EmptyCorpus,

    #[error("corpus contains a single class; cannot train a binary classifier")]
    SingleClass,

    #[error("minority class has {found} samples; at least 2 are needed for oversampling")]
    InsufficientMinority { found: usize },

    #[error("corpus matrix is {rows}x{columns} with {labels} labels; expected one label per row and {expected} columns")]
    Shape {
        rows: usize,
        columns: usize,
        labels: usize,
        expected: usize,
    },
}

/// A scoring or explanation request that does not match the model's features.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputShapeError {
    #[error("missing required feature `{0}`")]
    MissingFeature(String),

    #[error("feature `{feature}` is not numeric: {value}")]
    NonNumeric { feature: String, value: String },

    #[error("feature `{0}` is not a finite number")]
    NonFinite(String),

    #[error("expected {expected} feature values, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("request must be a JSON object keyed by feature name")]
    NotAnObject,
}

/// Failures on the request path.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error(transparent)]
    Input(#[from] InputShapeError),

    #[error("explanation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("explanation worker failed: {0}")]
    Worker(String),
}

/// Failures while building the scoring artifacts.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("training failed: {0}")]
    Training(String),
}
