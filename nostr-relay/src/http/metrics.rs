//! Prometheus metrics endpoint.

use crate::server::Relay;
use crate::storage::EventStore;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges: current state
    let connections = relay.connection_count();
    let subscriptions = relay.subscriptions().total_subscriptions();

    // Counters: monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let messages = m.messages_received.load(Ordering::Relaxed);
    let events_received = m.events_received.load(Ordering::Relaxed);
    let events_stored = m.events_stored.load(Ordering::Relaxed);
    let events_rejected = m.events_rejected.load(Ordering::Relaxed);
    let reqs = m.subscriptions_total.load(Ordering::Relaxed);
    let counts = m.counts_total.load(Ordering::Relaxed);
    let neg_sessions = m.negentropy_sessions_total.load(Ordering::Relaxed);
    let broadcasts = m.broadcasts_sent.load(Ordering::Relaxed);
    let dropped = m.broadcasts_dropped.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Storage stats (best effort)
    let stored_events = relay.storage().total_events().await.unwrap_or(0);

    let body = format!(
        r#"# HELP nostr_relay_connections_active Number of open WebSocket connections
# TYPE nostr_relay_connections_active gauge
nostr_relay_connections_active {connections}

# HELP nostr_relay_subscriptions_active Number of live subscriptions
# TYPE nostr_relay_subscriptions_active gauge
nostr_relay_subscriptions_active {subscriptions}

# HELP nostr_relay_info Server information
# TYPE nostr_relay_info gauge
nostr_relay_info{{version="{version}"}} 1

# HELP nostr_relay_connections_total Total WebSocket connections accepted
# TYPE nostr_relay_connections_total counter
nostr_relay_connections_total {conns_total}

# HELP nostr_relay_messages_received_total Total client frames received
# TYPE nostr_relay_messages_received_total counter
nostr_relay_messages_received_total {messages}

# HELP nostr_relay_events_received_total Total EVENT messages received
# TYPE nostr_relay_events_received_total counter
nostr_relay_events_received_total {events_received}

# HELP nostr_relay_events_stored_total Total events written to storage
# TYPE nostr_relay_events_stored_total counter
nostr_relay_events_stored_total {events_stored}

# HELP nostr_relay_events_rejected_total Total events rejected or already known
# TYPE nostr_relay_events_rejected_total counter
nostr_relay_events_rejected_total {events_rejected}

# HELP nostr_relay_req_total Total REQ subscriptions opened
# TYPE nostr_relay_req_total counter
nostr_relay_req_total {reqs}

# HELP nostr_relay_count_total Total COUNT requests answered
# TYPE nostr_relay_count_total counter
nostr_relay_count_total {counts}

# HELP nostr_relay_negentropy_sessions_total Total NEG-OPEN sessions started
# TYPE nostr_relay_negentropy_sessions_total counter
nostr_relay_negentropy_sessions_total {neg_sessions}

# HELP nostr_relay_broadcasts_sent_total Total live events delivered to subscribers
# TYPE nostr_relay_broadcasts_sent_total counter
nostr_relay_broadcasts_sent_total {broadcasts}

# HELP nostr_relay_broadcasts_dropped_total Total live events dropped on full queues
# TYPE nostr_relay_broadcasts_dropped_total counter
nostr_relay_broadcasts_dropped_total {dropped}

# HELP nostr_relay_rate_limit_hits_total Total rate limit rejections
# TYPE nostr_relay_rate_limit_hits_total counter
nostr_relay_rate_limit_hits_total {rate_limits}

# HELP nostr_relay_errors_total Total protocol errors
# TYPE nostr_relay_errors_total counter
nostr_relay_errors_total {errors}

# HELP nostr_relay_storage_events Number of events currently in database
# TYPE nostr_relay_storage_events gauge
nostr_relay_storage_events {stored_events}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
