use std::collections::TryReserveError;

use thiserror::Error;

/// Errors of the feature extraction and classification pipeline
#[derive(Error, Debug)]
pub enum MascError {
    /// Malformed or missing parameter (scale, statistic, cloud role, ratio, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unset or unknown feature, statistic or operator type
    #[error("Invalid feature type: {0}")]
    InvalidFeatureType(String),

    /// A source field, normals or colors are missing on a cloud
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Not enough memory: {0}")]
    Allocation(String),

    #[error("Neighborhood is empty")]
    EmptyNeighborhood,

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Training was aborted")]
    TrainingAborted,

    #[error("Operation was cancelled")]
    Cancelled,

    /// Invariant violation caused by a programming error upstream
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model could not be fitted, stored or restored
    #[error("Model error: {0}")]
    Model(String),
}

impl MascError {
    /// Returns `true` if this error reports a cooperative cancellation instead of a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MascError::Cancelled | MascError::TrainingAborted)
    }
}

impl From<TryReserveError> for MascError {
    fn from(err: TryReserveError) -> Self {
        MascError::Allocation(err.to_string())
    }
}

impl From<serde_json::Error> for MascError {
    fn from(err: serde_json::Error) -> Self {
        MascError::Model(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MascError>;
