//! # nostr-types
//!
//! Wire format types for the Tessera Nostr relay.
//!
//! This crate provides the foundational types used across all Tessera crates:
//! - [`Event`], [`Tag`], [`UnsignedEvent`] - NIP-01 events and signing
//! - [`Filter`] - Leniently decoded subscription filters
//! - [`ClientMessage`], [`RelayMessage`] - Protocol frames (EVENT, REQ, NEG-OPEN, ...)
//! - [`ConnectionId`] - Relay-side connection identity
//! - [`MessageError`], [`EventError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod filter;
mod ids;
mod messages;

pub use error::{EventError, MessageError};
pub use event::{Event, Tag, UnsignedEvent};
pub use filter::Filter;
pub use ids::ConnectionId;
pub use messages::{ClientMessage, RelayMessage};

pub use secp256k1;
