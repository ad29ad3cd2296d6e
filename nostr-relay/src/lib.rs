//! # tessera-nostr-relay
//!
//! Nostr relay server with NIP-77 negentropy set reconciliation.
//!
//! This crate implements a relay server that:
//! - Accepts NIP-01 WebSocket connections from Nostr clients
//! - Verifies, stores and fans out signed events
//! - Serves historical queries and live subscriptions
//! - Reconciles event sets with clients over NIP-77
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │     WebSocket      │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       tessera-relay        │
//!        │  ┌──────────┐ ┌─────────┐  │
//!        │  │ Sessions │ │  Subs   │  │
//!        │  └──────────┘ └─────────┘  │
//!        │  ┌─────────────────────┐   │
//!        │  │  SQLite (events)    │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! The relay handles these client messages:
//! - EVENT → OK (store and broadcast)
//! - REQ → EVENT* + EOSE (query, then live)
//! - CLOSE (drop a subscription)
//! - COUNT → COUNT (NIP-45)
//! - NEG-OPEN / NEG-MSG → NEG-MSG | NEG-ERR (NIP-77)
//! - NEG-CLOSE (drop a sync session)
//!
//! `GET /` with `Accept: application/nostr+json` returns the NIP-11
//! information document.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod subscriptions;
