//! Error types for the Tokengate limiter.

use thiserror::Error;

use crate::ratelimit::Decision;
use crate::store::StoreError;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading the bucket state failed; no decision was made.
    #[error("Storage read error: {0}")]
    StorageRead(#[source] StoreError),

    /// Writing the bucket state failed after the decision was computed.
    #[error("Storage write error ({decision}): {source}")]
    StorageWrite {
        decision: Decision,
        #[source]
        source: StoreError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// The decision that was reached before the error, if any.
    ///
    /// Only write failures carry one: the bucket was read and consumed, only
    /// persisting the new state failed.
    pub fn decision(&self) -> Option<Decision> {
        match self {
            LimiterError::StorageWrite { decision, .. } => Some(*decision),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
