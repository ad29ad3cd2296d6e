//! Error types for Nostr wire types.

use thiserror::Error;

/// Errors raised while parsing client or relay wire messages.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Frame is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not a message array
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Message type string is not recognized
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Errors raised while verifying or signing an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// Hex field could not be decoded or has the wrong length
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// Why decoding failed
        reason: String,
    },

    /// Event id does not match the canonical serialization
    #[error("event id does not match content hash")]
    IdMismatch,

    /// Signature does not verify against the id and pubkey
    #[error("signature verification failed")]
    BadSignature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MessageError::UnknownType("PING".into());
        assert_eq!(err.to_string(), "unknown message type: PING");

        let err = EventError::InvalidField {
            field: "pubkey",
            reason: "expected 32 bytes".into(),
        };
        assert_eq!(err.to_string(), "invalid pubkey: expected 32 bytes");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MessageError>();
        assert_send_sync::<EventError>();
    }
}
