//! Error taxonomy for publishing operations.
//!
//! Stage failures are deliberately absent: a stage that exits abnormally is
//! reported through the pipeline's signal channel, never as an `Err`.

use std::path::PathBuf;

/// Metadata rejected by the publishing policy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("application id {value:?} is not an unsigned integer")]
    InvalidApplicationId { value: String },

    #[error("no application id configured and none present in the descriptor")]
    MissingApplicationId,

    #[error("vendor name {name:?} is not accepted for publishing")]
    RejectedVendorName { name: String },

    #[error("no vendor name configured and none present in the descriptor")]
    MissingVendorName,
}

/// Errors surfaced synchronously to callers of the publisher.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("descriptor io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a misuse of the API rather than a runtime condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, PublishError::IllegalState(_))
    }
}

/// Result type for publishing operations.
pub type Result<T> = std::result::Result<T, PublishError>;
