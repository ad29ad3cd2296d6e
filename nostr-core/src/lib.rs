//! # nostr-core
//!
//! Pure logic for the Tessera Nostr relay (no I/O, instant tests).
//!
//! - [`filter`] - NIP-01 filter matching
//! - [`negentropy`] - NIP-77 range-based set reconciliation
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The relay crate owns storage, sockets and time; this
//! crate only answers questions about events and byte strings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod filter;
pub mod negentropy;

pub use filter::{matches_filter, matches_filters};
pub use negentropy::{Negentropy, NegentropyError, NegentropyStorageVector};
