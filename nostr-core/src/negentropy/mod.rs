//! NIP-77 negentropy: range-based set reconciliation.
//!
//! Two parties each hold a set of `(timestamp, id)` items. The initiator
//! describes its set as a sequence of ranges, each summarised either by a
//! fingerprint or by the full list of ids. The responder compares every range
//! against its own items and answers with finer ranges wherever they differ.
//! Round trips continue until every range matches; along the way each side
//! learns which ids it has that the other lacks, and vice versa.
//!
//! ## Wire format
//!
//! ```text
//! message  = version (0x61) range*
//! range    = bound mode payload
//! bound    = varint(timestamp delta, 0 = infinity) varint(prefix len) prefix
//! payload  = (Skip)        nothing
//!          | (Fingerprint) 16 bytes
//!          | (IdList)      varint(count) id*
//! ```
//!
//! Varints are big-endian base-128. Timestamps are delta-encoded against the
//! previous bound of the same message.

mod codec;
mod error;
mod session;
mod storage;
mod types;

pub use codec::{encode_varint, Reader};
pub use error::{NegentropyError, Result};
pub use session::Negentropy;
pub use storage::NegentropyStorageVector;
pub use types::{minimal_bound, Accumulator, Bound, Item, Mode};

/// Protocol version byte spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 0x61;

/// Size of an item id in bytes.
pub const ID_SIZE: usize = 32;

/// Size of a range fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 16;

/// Smallest nonzero frame size limit a session accepts.
pub const MIN_FRAME_SIZE_LIMIT: u64 = 4096;

/// Decode a hex NEG-OPEN / NEG-MSG payload.
pub fn decode_hex_message(message: &str) -> Result<Vec<u8>> {
    hex::decode(message).map_err(|e| NegentropyError::InvalidHex(e.to_string()))
}

/// Encode a message for NEG-MSG.
pub fn encode_hex_message(message: &[u8]) -> String {
    hex::encode(message)
}
