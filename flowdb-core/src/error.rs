//! Error types for FlowDB

use std::time::Duration;
use thiserror::Error;

/// Result type alias for FlowDB operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// FlowDB error types
#[derive(Error, Debug)]
pub enum FlowError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument (cutoff in the future, empty database path, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed filter condition
    #[error("Condition error: {0}")]
    Condition(String),

    /// Database path or summary document absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Aggregation matched no flows
    #[error("Query returned no results")]
    NoResults,

    /// A scan worker failed mid-query
    #[error("Internal processing error: {0}")]
    InternalProcessing(String),

    /// Summary lock could not be acquired in time
    #[error("Timed out after {0:?} waiting for the summary lock")]
    LockTimeout(Duration),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Encoding or decoding of a persisted document failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FlowError {
    /// Check if error stems from invalid user input
    pub fn is_validation(&self) -> bool {
        matches!(self, FlowError::Validation(_) | FlowError::Condition(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FlowError::Corruption(_) | FlowError::ChecksumMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for FlowError {
    fn from(err: bincode::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}
