//! Rate limiting for the relay.
//!
//! Provides protection against connection flooding and message spam.
//!
//! ## Design Notes
//!
//! Connection attempts are limited per client IP address, messages per
//! [`ConnectionId`]. A direct limiter caps aggregate message throughput.
//! The keyed limiters are backed by DashMap and shrunk by the cleanup task.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nostr_types::ConnectionId;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits new WebSocket connections per client IP.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits client frames per connection.
    message_limiter: Arc<KeyedLimiter<ConnectionId>>,

    /// Global rate limiter across all clients.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("message_limiter", &"KeyedLimiter<ConnectionId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

/// Zero is rejected by `Config::validate`; clamp here so a hand-built config
/// cannot panic.
fn nonzero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        // e.g. 10 connections/minute = 1 every 6 seconds, burst of 10
        let connection_quota = Quota::per_minute(nonzero(config.connections_per_ip));
        let message_quota = Quota::per_minute(nonzero(config.messages_per_minute));
        let global_quota = Quota::per_second(nonzero(config.global_requests_per_second));

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            message_limiter: Arc::new(RateLimiter::keyed(message_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a connection attempt from `ip` is allowed.
    pub fn check_connection(&self, ip: &IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if a frame on `connection_id` is allowed.
    pub fn check_message(&self, connection_id: &ConnectionId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(connection_id)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    ///
    /// This is a server-wide rate limit that caps aggregate throughput
    /// regardless of individual client limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle entries from the keyed limiters.
    ///
    /// `retain_recent()` drops keys whose cells have fully recharged.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    ConnectionLimitExceeded,
    /// Too many messages on this connection.
    MessageLimitExceeded,
    /// Global request rate exceeded across all clients.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded => write!(f, "too many connections"),
            Self::MessageLimitExceeded => write!(f, "slow down, too many messages"),
            Self::GlobalLimitExceeded => write!(f, "relay is busy, try again later"),
        }
    }
}

impl std::error::Error for RateLimitError {}
