//! Negentropy error types.

use thiserror::Error;

/// Errors raised by the negentropy storage vector and session.
///
/// Parse errors are local to the message being processed; they never mutate
/// storage and never invoke the have/need callbacks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegentropyError {
    /// Insert or seal on a vector that is already sealed
    #[error("storage already sealed")]
    AlreadySealed,

    /// Read access to, or a session over, a vector that was never sealed
    #[error("storage not sealed")]
    NotSealed,

    /// Two identical (timestamp, id) items were inserted
    #[error("duplicate item inserted")]
    DuplicateItem,

    /// Item id is not exactly 32 bytes
    #[error("bad id size: expected 32 bytes, got {0}")]
    BadIdSize(usize),

    /// Range does not lie within the vector
    #[error("range {begin}..{end} out of bounds")]
    BadRange {
        /// Start index
        begin: usize,
        /// End index (exclusive)
        end: usize,
    },

    /// Nonzero frame size limit below the protocol minimum
    #[error("frame size limit too small: {0} (minimum 4096)")]
    FrameSizeLimitTooSmall(u64),

    /// `initiate()` called twice
    #[error("already initiated")]
    AlreadyInitiated,

    /// Leading byte is not a negentropy protocol version
    #[error("invalid negentropy protocol version byte: 0x{0:02x}")]
    InvalidVersion(u8),

    /// Peer speaks a protocol version this initiator does not
    #[error("unsupported negentropy protocol version requested: 0x{0:02x}")]
    UnsupportedVersion(u8),

    /// Message ended in the middle of a field
    #[error("unexpected end of message")]
    Truncated,

    /// Varint does not fit in 64 bits
    #[error("varint overflow")]
    VarintOverflow,

    /// Bound id prefix longer than an id
    #[error("bound id too long: {0} bytes")]
    BoundIdTooLong(u64),

    /// Range mode is not Skip, Fingerprint or IdList
    #[error("unexpected mode: {0}")]
    UnknownMode(u64),

    /// NEG-OPEN / NEG-MSG payload is not hex
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Result type for negentropy operations.
pub type Result<T> = std::result::Result<T, NegentropyError>;
