//! Main relay coordination.
//!
//! `Relay` owns storage, the subscription directory and the outbound queue
//! of every open connection, and fans stored events out to subscribers.

use crate::config::Config;
use crate::limits::RateLimits;
use crate::storage::SqliteStorage;
use crate::subscriptions::SubscriptionManager;
use dashmap::DashMap;
use nostr_types::{ConnectionId, Event, RelayMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Total client frames received.
    pub messages_received: AtomicU64,
    /// Total EVENT messages received.
    pub events_received: AtomicU64,
    /// Total events written to storage.
    pub events_stored: AtomicU64,
    /// Total events rejected (invalid, duplicate, outdated, expired).
    pub events_rejected: AtomicU64,
    /// Total REQ messages accepted.
    pub subscriptions_total: AtomicU64,
    /// Total COUNT messages answered.
    pub counts_total: AtomicU64,
    /// Total NEG-OPEN sessions started.
    pub negentropy_sessions_total: AtomicU64,
    /// Total live events delivered to subscribers.
    pub broadcasts_sent: AtomicU64,
    /// Total live events dropped because a subscriber's queue was full.
    pub broadcasts_dropped: AtomicU64,
    /// Total rate limit rejections (connection + message + global).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors (malformed frames, storage failures, etc.).
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct Relay {
    config: Config,
    storage: Arc<SqliteStorage>,
    /// Rate limiters for connections and messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: RelayMetrics,
    /// Live subscriptions of every connection.
    subscriptions: SubscriptionManager,
    /// Outbound queue of every open connection.
    connections: DashMap<ConnectionId, mpsc::Sender<RelayMessage>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a new Relay with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            storage: Arc::new(storage),
            rate_limits,
            metrics: RelayMetrics::default(),
            subscriptions: SubscriptionManager::new(),
            connections: DashMap::new(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get a clone of the storage Arc for background tasks.
    pub fn storage_arc(&self) -> Arc<SqliteStorage> {
        self.storage.clone()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get access to the subscription directory.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Register the outbound queue of a new connection.
    pub fn register_connection(&self, connection_id: ConnectionId, sender: mpsc::Sender<RelayMessage>) {
        self.connections.insert(connection_id, sender);
        tracing::debug!(
            "Registered connection {:?} (total: {})",
            connection_id,
            self.connections.len()
        );
    }

    /// Forget a connection and every subscription it held.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);
        let removed = self.subscriptions.remove_connection(connection_id);
        tracing::debug!(
            "Unregistered connection {:?} ({} subscriptions dropped, remaining: {})",
            connection_id,
            removed,
            self.connections.len()
        );
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue `event` to every subscription that matches it.
    ///
    /// Delivery is fire-and-forget: a subscriber whose queue is full or
    /// closed misses the event. Returns how many copies were queued.
    pub fn broadcast(&self, event: &Event) -> usize {
        let matching = self.subscriptions.get_matching_subscriptions(event);
        if matching.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for subscription in &matching {
            let Some(sender) = self
                .connections
                .get(&subscription.connection_id)
                .map(|entry| entry.value().clone())
            else {
                continue;
            };

            let message = RelayMessage::Event {
                subscription_id: subscription.subscription_id.clone(),
                event: Box::new(event.clone()),
            };
            match sender.try_send(message) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.broadcasts_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "Outbound queue full for {:?}, dropping event {}",
                        subscription.connection_id,
                        event.id
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        self.metrics
            .broadcasts_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        tracing::trace!(
            "Broadcast event {} to {}/{} subscriptions",
            event.id,
            sent,
            matching.len()
        );
        sent
    }
}
