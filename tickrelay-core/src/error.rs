//! Error types for tickrelay

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for tickrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// tickrelay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listening socket could not be set up
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination table is not a plain SQL identifier
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    /// Storage URL scheme not handled by any backend
    #[error("Unsupported storage URL: {0}")]
    UnsupportedStorage(String),

    /// Storage backend failure (connect, transaction or statement)
    #[error("storage error on {destination}: {source}")]
    Storage {
        destination: String,
        #[source]
        source: sqlx::Error,
    },

    /// Timestamp cannot be represented as an absolute time
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

impl RelayError {
    /// Errors that must abort startup before any connection is accepted
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Bind { .. }
                | RelayError::Config(_)
                | RelayError::InvalidTableName(_)
                | RelayError::UnsupportedStorage(_)
                | RelayError::Storage { .. }
        )
    }

    /// Check if error came from the storage side of a batch
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            RelayError::Storage { .. } | RelayError::InvalidTimestamp(_)
        )
    }
}
