//! Error types for the proxy.

use std::path::PathBuf;

use thiserror::Error;
use wxbackup_storage::StorageError;

/// Failure while setting up or running the interception proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("root CA unavailable: {0}")]
    Ca(#[from] CaManagerError),

    /// Leaf issuance or TLS configuration failed.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The listener could not be built, or no tokio runtime was available.
    #[error("proxy server: {0}")]
    Server(String),
}

/// Failure while creating, loading or reading the root CA.
#[derive(Debug, Error)]
pub enum CaManagerError {
    #[error("no data directory available for the root CA")]
    NoDataDir,

    #[error("CA generation failed: {0}")]
    Generation(String),

    /// Stored certificate or key could not be decoded.
    #[error("CA material is unreadable: {0}")]
    Parse(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error raised by a content rule while handling an exchange.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The payload did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Parse(String),

    #[error("embedded JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("bad URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
