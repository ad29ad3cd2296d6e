//! Per-connection session management.
//!
//! Each WebSocket gets a Session that processes client frames strictly in
//! order and answers through the connection's outbound queue. The same queue
//! carries live events fanned out by [`Relay::broadcast`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Relay;
use crate::storage::{EventStore, StoreOutcome};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use nostr_core::negentropy::{
    decode_hex_message, encode_hex_message, Negentropy, NegentropyStorageVector,
};
use nostr_types::{ClientMessage, ConnectionId, Event, Filter, RelayMessage};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_SIZE: usize = 1024;

/// How long the writer may keep flushing after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A per-connection session.
pub struct Session {
    relay: Arc<Relay>,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<RelayMessage>,
    /// Open NIP-77 sessions keyed by subscription id. The relay is always
    /// the responder.
    negentropy: HashMap<String, Negentropy>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("negentropy_sessions", &self.negentropy.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session and register its outbound queue with the relay.
    ///
    /// The caller drains the returned receiver to the client.
    pub fn new(relay: Arc<Relay>) -> (Self, mpsc::Receiver<RelayMessage>) {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let connection_id = ConnectionId::new();
        relay.register_connection(connection_id, outbound.clone());

        let session = Self {
            relay,
            connection_id,
            outbound,
            negentropy: HashMap::new(),
        };
        (session, receiver)
    }

    /// This session's connection id.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Run the session until the client disconnects.
    pub async fn run(mut self, socket: WebSocket, mut outbound: mpsc::Receiver<RelayMessage>) {
        tracing::info!("New connection {:?}", self.connection_id);
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = sink.send(Message::Text(message.to_json())).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(&text).await,
                Ok(Message::Binary(_)) => {
                    self.send(RelayMessage::notice("error: binary frames are not supported"))
                        .await;
                }
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by the WebSocket layer.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("WebSocket read failed on {:?}: {}", self.connection_id, e);
                    break;
                }
            }
        }

        tracing::info!("Connection {:?} closed", self.connection_id);
        // Dropping the session unregisters it and closes the outbound queue.
        drop(self);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            tracing::debug!("Writer did not drain in time");
        }
    }

    /// Process one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        self.relay
            .metrics()
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        let limit = self.relay.config().limits.max_message_size;
        if text.len() > limit {
            let err = ProtocolError::MessageTooLarge {
                size: text.len(),
                limit,
            };
            self.send(RelayMessage::notice(format!("error: {err}"))).await;
            return;
        }

        let parsed = ClientMessage::from_json(text);

        if let Err(ProtocolError::RateLimited { reason }) = self.check_rate_limits() {
            let reply = match &parsed {
                Ok(ClientMessage::Event(event)) => {
                    RelayMessage::ok(event.id.clone(), false, format!("rate-limited: {reason}"))
                }
                _ => RelayMessage::notice(format!("rate-limited: {reason}")),
            };
            self.send(reply).await;
            return;
        }

        let message = match parsed {
            Ok(message) => message,
            Err(e) => {
                let err = ProtocolError::from(e);
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Malformed frame on {:?}: {}", self.connection_id, err);
                self.send(RelayMessage::notice(format!("error: {err}"))).await;
                return;
            }
        };

        match message {
            ClientMessage::Event(event) => self.handle_event(*event).await,
            ClientMessage::Req {
                subscription_id,
                filters,
            } => self.handle_req(subscription_id, filters).await,
            ClientMessage::Close { subscription_id } => {
                self.relay
                    .subscriptions()
                    .unsubscribe(&self.connection_id, &subscription_id);
            }
            ClientMessage::Count {
                subscription_id,
                filters,
            } => self.handle_count(subscription_id, filters).await,
            ClientMessage::Auth(_) => {
                self.send(RelayMessage::notice("error: AUTH is not supported"))
                    .await;
            }
            ClientMessage::NegOpen {
                subscription_id,
                filter,
                message,
            } => self.handle_neg_open(subscription_id, filter, &message).await,
            ClientMessage::NegMsg {
                subscription_id,
                message,
            } => self.handle_neg_msg(subscription_id, &message).await,
            ClientMessage::NegClose { subscription_id } => {
                self.negentropy.remove(&subscription_id);
            }
        }
    }

    fn check_rate_limits(&self) -> ProtocolResult<()> {
        let limits = self.relay.rate_limits();
        let result = limits
            .check_global()
            .and_then(|()| limits.check_message(&self.connection_id));

        result.map_err(|e| {
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rate limited {:?}: {}", self.connection_id, e);
            ProtocolError::RateLimited {
                reason: e.to_string(),
            }
        })
    }

    /// Handle EVENT: validate, store, acknowledge, then fan out.
    async fn handle_event(&mut self, event: Event) {
        let metrics = self.relay.metrics();
        metrics.events_received.fetch_add(1, Ordering::Relaxed);

        let (accepted, message) = match self.accept_event(&event).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                self.send(RelayMessage::ok(event.id.clone(), true, "")).await;
                self.relay.metrics().events_stored.fetch_add(1, Ordering::Relaxed);
                self.relay.broadcast(&event);
                return;
            }
            Err(e) => {
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to store event {}: {}", event.id, e);
                (false, "error: could not save event".to_string())
            }
        };

        if !accepted || message.starts_with("duplicate") {
            self.relay
                .metrics()
                .events_rejected
                .fetch_add(1, Ordering::Relaxed);
        }
        self.send(RelayMessage::ok(event.id.clone(), accepted, message))
            .await;

        // Ephemeral events are acknowledged and broadcast without storage.
        if accepted && event.is_ephemeral() {
            self.relay.broadcast(&event);
        }
    }

    /// `Ok(None)` means the event was newly stored; otherwise the OK reply.
    async fn accept_event(&self, event: &Event) -> ProtocolResult<Option<(bool, String)>> {
        if let Err(e) = event.verify() {
            return Ok(Some((false, format!("invalid: {e}"))));
        }

        let now = unix_now();
        let max_future = self.relay.config().limits.max_future_seconds;
        if event.created_at > now.saturating_add(max_future) {
            return Ok(Some((
                false,
                "invalid: event creation date is too far in the future".to_string(),
            )));
        }
        if event.is_expired(now) {
            return Ok(Some((false, "invalid: event has expired".to_string())));
        }

        if event.is_ephemeral() {
            return Ok(Some((true, String::new())));
        }

        let storage = self.relay.storage();
        let outcome = if event.is_replaceable() {
            storage.store_replaceable_event(event).await?
        } else if event.is_parameterized_replaceable() {
            storage.store_parameterized_replaceable_event(event).await?
        } else {
            storage.store_event(event).await?
        };

        Ok(match outcome {
            StoreOutcome::Stored => None,
            StoreOutcome::Duplicate => Some((true, "duplicate: already have this event".to_string())),
            StoreOutcome::Outdated => Some((
                false,
                "duplicate: have a newer version of this event".to_string(),
            )),
        })
    }

    /// Handle REQ: subscribe, replay stored events, then EOSE.
    async fn handle_req(&mut self, subscription_id: String, filters: Vec<Filter>) {
        if let Err(reason) = self.validate_request(&subscription_id, &filters) {
            self.send(RelayMessage::closed(subscription_id, reason)).await;
            return;
        }

        let subscriptions = self.relay.subscriptions();
        let max_subscriptions = self.relay.config().limits.max_subscriptions;
        let is_new = subscriptions
            .get(&self.connection_id, &subscription_id)
            .is_none();
        if is_new && subscriptions.subscription_count(&self.connection_id) >= max_subscriptions {
            self.send(RelayMessage::closed(
                subscription_id,
                format!("blocked: at most {max_subscriptions} subscriptions per connection"),
            ))
            .await;
            return;
        }

        let query = self.clamp_limits(&filters);
        subscriptions.subscribe(self.connection_id, subscription_id.clone(), filters);
        self.relay
            .metrics()
            .subscriptions_total
            .fetch_add(1, Ordering::Relaxed);

        match self.relay.storage().query_events(&query).await {
            Ok(events) => {
                tracing::debug!(
                    "REQ {} on {:?}: {} stored events",
                    subscription_id,
                    self.connection_id,
                    events.len()
                );
                for event in events {
                    self.send(RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: Box::new(event),
                    })
                    .await;
                }
                self.send(RelayMessage::Eose { subscription_id }).await;
            }
            Err(e) => {
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Query failed for {}: {}", subscription_id, e);
                self.relay
                    .subscriptions()
                    .unsubscribe(&self.connection_id, &subscription_id);
                self.send(RelayMessage::closed(subscription_id, "error: query failed"))
                    .await;
            }
        }
    }

    /// Handle COUNT (NIP-45).
    async fn handle_count(&mut self, subscription_id: String, filters: Vec<Filter>) {
        if let Err(reason) = self.validate_request(&subscription_id, &filters) {
            self.send(RelayMessage::closed(subscription_id, reason)).await;
            return;
        }

        match self.relay.storage().count_events(&filters).await {
            Ok(count) => {
                self.relay.metrics().counts_total.fetch_add(1, Ordering::Relaxed);
                self.send(RelayMessage::Count {
                    subscription_id,
                    count,
                })
                .await;
            }
            Err(e) => {
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Count failed for {}: {}", subscription_id, e);
                self.send(RelayMessage::closed(subscription_id, "error: count failed"))
                    .await;
            }
        }
    }

    /// Handle NEG-OPEN (NIP-77). Replaces any session with the same id.
    async fn handle_neg_open(&mut self, subscription_id: String, filter: Filter, message: &str) {
        self.negentropy.remove(&subscription_id);

        let config = &self.relay.config().negentropy;
        if !config.enabled {
            self.send_neg_err(subscription_id, "blocked: negentropy is disabled")
                .await;
            return;
        }
        if !self.valid_subscription_id(&subscription_id) {
            self.send_neg_err(subscription_id, "error: invalid subscription id")
                .await;
            return;
        }
        if self.negentropy.len() >= config.max_sessions_per_connection {
            self.send_neg_err(subscription_id, "blocked: too many open sync sessions")
                .await;
            return;
        }

        let max_sync_events = config.max_sync_events;
        let frame_size_limit = config.frame_size_limit;
        let storage = match self.build_sync_set(filter, max_sync_events).await {
            Ok(Some(storage)) => storage,
            Ok(None) => {
                self.send_neg_err(subscription_id, "blocked: too many query results")
                    .await;
                return;
            }
            Err(e) => {
                self.send_neg_err(subscription_id, format!("error: {e}")).await;
                return;
            }
        };

        let result = Negentropy::new(storage, frame_size_limit)
            .map_err(ProtocolError::from)
            .and_then(|session| {
                let reply = respond(&session, message)?;
                Ok((session, reply))
            });

        match result {
            Ok((session, reply)) => {
                self.relay
                    .metrics()
                    .negentropy_sessions_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "NEG-OPEN {} on {:?} over {} events",
                    subscription_id,
                    self.connection_id,
                    session.storage().len()
                );
                self.negentropy.insert(subscription_id.clone(), session);
                self.send(RelayMessage::NegMsg {
                    subscription_id,
                    message: reply,
                })
                .await;
            }
            Err(e) => self.send_neg_err(subscription_id, format!("error: {e}")).await,
        }
    }

    /// Handle NEG-MSG (NIP-77).
    async fn handle_neg_msg(&mut self, subscription_id: String, message: &str) {
        let Some(session) = self.negentropy.get(&subscription_id) else {
            self.send_neg_err(subscription_id, "closed: no open sync session")
                .await;
            return;
        };

        match respond(session, message) {
            Ok(reply) => {
                self.send(RelayMessage::NegMsg {
                    subscription_id,
                    message: reply,
                })
                .await;
            }
            Err(e) => {
                // A failed message ends the session.
                self.negentropy.remove(&subscription_id);
                self.send_neg_err(subscription_id, format!("error: {e}")).await;
            }
        }
    }

    /// Sealed vector of the stored events matching `filter`, or `None` when
    /// they exceed `max_events`.
    async fn build_sync_set(
        &self,
        mut filter: Filter,
        max_events: usize,
    ) -> ProtocolResult<Option<NegentropyStorageVector>> {
        let cap = max_events.saturating_add(1);
        filter.limit = Some(filter.limit.map_or(cap, |limit| limit.min(cap)));

        let events = self.relay.storage().query_events(&[filter]).await?;
        if events.len() > max_events {
            return Ok(None);
        }

        let mut storage = NegentropyStorageVector::with_capacity(events.len());
        for event in &events {
            // Rows whose id is not canonical hex cannot be synced.
            let Some(id) = event.id_bytes() else {
                tracing::warn!("Skipping non-canonical id {} in sync set", event.id);
                continue;
            };
            storage.insert(event.created_at, &id)?;
        }
        storage.seal()?;
        Ok(Some(storage))
    }

    fn validate_request(&self, subscription_id: &str, filters: &[Filter]) -> Result<(), String> {
        let limits = &self.relay.config().limits;
        if !self.valid_subscription_id(subscription_id) {
            return Err(format!(
                "invalid: subscription id must be 1 to {} characters",
                limits.max_subid_length
            ));
        }
        if filters.len() > limits.max_filters {
            return Err(format!(
                "invalid: at most {} filters per request",
                limits.max_filters
            ));
        }
        Ok(())
    }

    fn valid_subscription_id(&self, subscription_id: &str) -> bool {
        let max = self.relay.config().limits.max_subid_length;
        !subscription_id.is_empty() && subscription_id.chars().count() <= max
    }

    /// Apply the default limit and clamp to the maximum.
    fn clamp_limits(&self, filters: &[Filter]) -> Vec<Filter> {
        let limits = &self.relay.config().limits;
        filters
            .iter()
            .cloned()
            .map(|mut filter| {
                let limit = filter.limit.unwrap_or(limits.default_query_limit);
                filter.limit = Some(limit.min(limits.max_query_limit));
                filter
            })
            .collect()
    }

    async fn send_neg_err(&self, subscription_id: String, reason: impl Into<String>) {
        self.send(RelayMessage::NegErr {
            subscription_id,
            reason: reason.into(),
        })
        .await;
    }

    async fn send(&self, message: RelayMessage) {
        if self.outbound.send(message).await.is_err() {
            tracing::debug!("Outbound queue closed for {:?}", self.connection_id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.relay.unregister_connection(&self.connection_id);
    }
}

/// Run one responder round over a hex message.
fn respond(session: &Negentropy, message: &str) -> ProtocolResult<String> {
    let query = decode_hex_message(message)?;
    // The relay serves ids; the client decides what to fetch or upload.
    let reply = session
        .reconcile(&query, |_| {}, |_| {})?
        .unwrap_or_default();
    Ok(encode_hex_message(&reply))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
