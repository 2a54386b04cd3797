//! Error types for the dispatch core and its engines

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors: reported immediately, never defaulted.
    #[error("Operation not registered: {0}")]
    UnregisteredOperation(String),

    #[error("Operation registered twice: {0}")]
    DuplicateOperation(String),

    #[error("Invalid execution target selector: {0}")]
    InvalidTarget(String),

    #[error("Unknown method {method} in {estimator}")]
    UnknownMethod { estimator: String, method: String },

    #[error("Operation {0} is registered for a different estimator type")]
    RouteMismatch(String),

    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    // Raised by an accelerated engine at run time; recovered by the dispatcher.
    #[error("Accelerated engine rejected the call: {0}")]
    Incompatible(String),

    // Reference-native failures, propagated to callers unchanged.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("This {0} instance is not fitted yet")]
    NotFitted(&'static str),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Input contains NaN or infinity")]
    NonFinite,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Whether this error is a configuration error of the dispatch layer itself
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnregisteredOperation(_)
                | Error::DuplicateOperation(_)
                | Error::InvalidTarget(_)
                | Error::UnknownMethod { .. }
                | Error::RouteMismatch(_)
                | Error::MissingAttribute(_)
        )
    }

    /// Whether the accelerated path may recover from this error by falling back
    pub fn is_incompatibility(&self) -> bool {
        matches!(self, Error::Incompatible(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
