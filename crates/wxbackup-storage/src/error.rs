//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record was submitted without its natural key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Wraps another storage error with the operation that failed.
    #[error("{operation} failed: {source}")]
    Operation {
        /// The operation being performed.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Attaches the name of the failed operation to this error.
    pub fn during(self, operation: &'static str) -> Self {
        StorageError::Operation {
            operation,
            source: Box::new(self),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
