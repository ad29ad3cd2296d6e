//! Error types for the relay.

use std::path::PathBuf;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored event could not be encoded or decoded.
    #[error("event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
///
/// These never close the connection; the session turns each into a NOTICE,
/// CLOSED, OK or NEG-ERR reply.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be parsed.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] nostr_types::MessageError),

    /// Negentropy message could not be processed.
    #[error("negentropy: {0}")]
    Negentropy(#[from] nostr_core::NegentropyError),

    /// Rate limit exceeded.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Frame exceeded the configured size.
    #[error("message too large: {size} bytes (limit: {limit} bytes)")]
    MessageTooLarge {
        /// Actual size of the frame.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Storage failure surfaced to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ProtocolError {
    fn from(e: StorageError) -> Self {
        ProtocolError::Internal(e.to_string())
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
