//! Storage layer for the relay.
//!
//! Persists signed events and answers filter queries.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use nostr_types::{Event, Filter};

/// Result of a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The event was written.
    Stored,
    /// An event with the same id already exists.
    Duplicate,
    /// A newer event already occupies the replaceable slot.
    Outdated,
}

/// Trait for event storage backends.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a regular event.
    async fn store_event(&self, event: &Event) -> Result<StoreOutcome, StorageError>;

    /// Store a replaceable event, keeping only the newest per `(pubkey, kind)`.
    ///
    /// On equal `created_at` the event with the lowest id wins.
    async fn store_replaceable_event(&self, event: &Event) -> Result<StoreOutcome, StorageError>;

    /// Store a parameterized replaceable event, keeping only the newest per
    /// `(pubkey, kind, d-tag)`.
    async fn store_parameterized_replaceable_event(
        &self,
        event: &Event,
    ) -> Result<StoreOutcome, StorageError>;

    /// Get events matching any of `filters`.
    ///
    /// Each filter's `limit` caps that filter's contribution (most recent
    /// first). The union is deduplicated and ordered newest first, ties by id.
    /// Expired events are never returned.
    async fn query_events(&self, filters: &[Filter]) -> Result<Vec<Event>, StorageError>;

    /// Count distinct events matching any of `filters`. Limits are ignored.
    async fn count_events(&self, filters: &[Filter]) -> Result<u64, StorageError>;

    /// Remove events whose NIP-40 expiration is at or before `now`.
    ///
    /// Returns the number of events deleted.
    async fn delete_expired(&self, now: u64) -> Result<u64, StorageError>;

    /// Total number of stored events.
    async fn total_events(&self) -> Result<u64, StorageError>;
}
