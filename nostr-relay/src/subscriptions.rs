//! Live subscription directory.
//!
//! Subscriptions are keyed by `(connection, subscription id)`. Each one is an
//! immutable [`Subscription`] behind an `Arc`; replacing a subscription swaps
//! the `Arc`, so a broadcast never observes a half-updated filter set.

use dashmap::DashMap;
use nostr_core::matches_filters;
use nostr_types::{ConnectionId, Event, Filter};
use std::collections::HashMap;
use std::sync::Arc;

/// A live REQ.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Client-chosen id, unique per connection.
    pub subscription_id: String,
    /// Disjunction of filters.
    pub filters: Vec<Filter>,
}

impl Subscription {
    /// Does `event` match any of this subscription's filters?
    pub fn matches(&self, event: &Event) -> bool {
        matches_filters(&self.filters, event)
    }
}

/// Concurrent map of connection → subscription id → subscription.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    connections: DashMap<ConnectionId, HashMap<String, Arc<Subscription>>>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, replacing any with the same id on this connection.
    ///
    /// Returns true if an existing subscription was replaced.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        subscription_id: impl Into<String>,
        filters: Vec<Filter>,
    ) -> bool {
        let subscription_id = subscription_id.into();
        let subscription = Arc::new(Subscription {
            connection_id,
            subscription_id: subscription_id.clone(),
            filters,
        });

        let replaced = self
            .connections
            .entry(connection_id)
            .or_default()
            .insert(subscription_id, subscription)
            .is_some();

        tracing::trace!(
            "Subscribed {:?} (replaced: {}, connection total: {})",
            connection_id,
            replaced,
            self.subscription_count(&connection_id)
        );
        replaced
    }

    /// Remove one subscription. No-op if it does not exist.
    ///
    /// Returns true if something was removed.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, subscription_id: &str) -> bool {
        let removed = self
            .connections
            .get_mut(connection_id)
            .map(|mut subs| subs.remove(subscription_id).is_some())
            .unwrap_or(false);

        // Drop the connection entry once it holds nothing.
        self.connections
            .remove_if(connection_id, |_, subs| subs.is_empty());
        removed
    }

    /// Remove every subscription of a connection. Returns how many were removed.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> usize {
        self.connections
            .remove(connection_id)
            .map(|(_, subs)| subs.len())
            .unwrap_or(0)
    }

    /// Snapshot of every subscription whose filters match `event`.
    pub fn get_matching_subscriptions(&self, event: &Event) -> Vec<Arc<Subscription>> {
        self.connections
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|sub| sub.matches(event))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Look up one subscription.
    pub fn get(&self, connection_id: &ConnectionId, subscription_id: &str) -> Option<Arc<Subscription>> {
        self.connections
            .get(connection_id)
            .and_then(|subs| subs.get(subscription_id).cloned())
    }

    /// Number of live subscriptions on one connection.
    pub fn subscription_count(&self, connection_id: &ConnectionId) -> usize {
        self.connections
            .get(connection_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of live subscriptions across all connections.
    pub fn total_subscriptions(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of connections holding at least one subscription.
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::secp256k1::{Keypair, SECP256K1};
    use nostr_types::{Tag, UnsignedEvent};

    fn note(kind: u32) -> Event {
        let keys = Keypair::from_seckey_slice(SECP256K1, &[0x11; 32]).unwrap();
        UnsignedEvent::new(1000, kind, "hi").sign(&keys)
    }

    #[test]
    fn subscribe_and_replace() {
        let manager = SubscriptionManager::new();
        let conn = ConnectionId::new();

        assert!(!manager.subscribe(conn, "sub", vec![Filter::new().kinds([1])]));
        assert!(manager.subscribe(conn, "sub", vec![Filter::new().kinds([2])]));
        assert_eq!(manager.subscription_count(&conn), 1);

        let sub = manager.get(&conn, "sub").unwrap();
        assert_eq!(sub.filters, vec![Filter::new().kinds([2])]);
        assert!(manager.get_matching_subscriptions(&note(1)).is_empty());
        assert_eq!(manager.get_matching_subscriptions(&note(2)).len(), 1);
    }

    #[test]
    fn unsubscribe_is_noop_when_absent() {
        let manager = SubscriptionManager::new();
        let conn = ConnectionId::new();

        assert!(!manager.unsubscribe(&conn, "missing"));
        manager.subscribe(conn, "a", vec![Filter::new()]);
        assert!(manager.unsubscribe(&conn, "a"));
        assert!(!manager.unsubscribe(&conn, "a"));
        assert_eq!(manager.total_connections(), 0);
    }

    #[test]
    fn remove_connection_counts() {
        let manager = SubscriptionManager::new();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();

        manager.subscribe(conn, "a", vec![Filter::new()]);
        manager.subscribe(conn, "b", vec![Filter::new()]);
        manager.subscribe(other, "a", vec![Filter::new()]);

        assert_eq!(manager.remove_connection(&conn), 2);
        assert_eq!(manager.remove_connection(&conn), 0);
        assert_eq!(manager.total_subscriptions(), 1);
    }

    #[test]
    fn same_id_on_different_connections_is_independent() {
        let manager = SubscriptionManager::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        manager.subscribe(a, "feed", vec![Filter::new().kinds([1])]);
        manager.subscribe(b, "feed", vec![Filter::new().kinds([1, 7])]);

        let matched = manager.get_matching_subscriptions(&note(1));
        assert_eq!(matched.len(), 2);

        let matched = manager.get_matching_subscriptions(&note(7));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].connection_id, b);
    }

    #[test]
    fn empty_filter_list_matches_nothing() {
        let manager = SubscriptionManager::new();
        manager.subscribe(ConnectionId::new(), "none", Vec::new());
        assert!(manager.get_matching_subscriptions(&note(1)).is_empty());
    }

    #[test]
    fn replace_is_atomic_under_concurrent_readers() {
        let manager = Arc::new(SubscriptionManager::new());
        let conn = ConnectionId::new();
        let old = vec![Filter::new().kinds([1]), Filter::new().tag("t", ["old"])];
        let new = vec![Filter::new().kinds([2]), Filter::new().tag("t", ["new"])];
        let kind_one = note(1);
        let kind_two = note(2);

        manager.subscribe(conn, "s", old.clone());

        std::thread::scope(|scope| {
            let writer = manager.clone();
            let (old_set, new_set) = (&old, &new);
            scope.spawn(move || {
                for i in 0..500 {
                    let filters = if i % 2 == 0 { new_set } else { old_set };
                    writer.subscribe(conn, "s", filters.clone());
                }
            });

            for _ in 0..3 {
                let reader = manager.clone();
                let (old_set, new_set) = (&old, &new);
                let (kind_one, kind_two) = (&kind_one, &kind_two);
                scope.spawn(move || {
                    for _ in 0..500 {
                        assert_eq!(reader.subscription_count(&conn), 1);

                        let current = reader.get(&conn, "s").unwrap();
                        assert!(current.filters == *old_set || current.filters == *new_set);

                        // Kind 1 only matches the old set, kind 2 only the new.
                        for sub in reader.get_matching_subscriptions(kind_one) {
                            assert_eq!(sub.filters, *old_set);
                        }
                        for sub in reader.get_matching_subscriptions(kind_two) {
                            assert_eq!(sub.filters, *new_set);
                        }
                        assert!(reader.get_matching_subscriptions(kind_one).len() <= 1);
                    }
                });
            }
        });

        // 500 alternations end on the old set.
        assert_eq!(manager.get(&conn, "s").unwrap().filters, old);
        assert_eq!(manager.total_subscriptions(), 1);
    }

    #[test]
    fn fanout_agrees_with_brute_force_matching() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};
        use std::collections::HashSet;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let authors: Vec<Keypair> = (1..=3u8)
            .map(|b| Keypair::from_seckey_slice(SECP256K1, &[b; 32]).unwrap())
            .collect();
        let pubkeys: Vec<String> = authors
            .iter()
            .map(|k| hex::encode(k.x_only_public_key().0.serialize()))
            .collect();
        let kinds = [1u32, 2, 3, 7];
        let topics = ["a", "b", "c"];

        let events: Vec<Event> = (0..40)
            .map(|i| {
                let keys = authors.choose(&mut rng).unwrap();
                let kind = *kinds.choose(&mut rng).unwrap();
                let topic = *topics.choose(&mut rng).unwrap();
                UnsignedEvent::new(rng.gen_range(0..100), kind, format!("event {i}"))
                    .tag(Tag::new(["t", topic]))
                    .sign(keys)
            })
            .collect();

        let random_filter = |rng: &mut StdRng| {
            let mut filter = Filter::new();
            if rng.gen_bool(0.5) {
                let count = rng.gen_range(1..=2);
                filter = filter.kinds(kinds.choose_multiple(rng, count).copied());
            }
            if rng.gen_bool(0.3) {
                let prefix_len = rng.gen_range(1..=64);
                let pubkey = pubkeys.choose(rng).unwrap();
                filter = filter.authors([&pubkey[..prefix_len]]);
            }
            if rng.gen_bool(0.3) {
                filter = filter.since(rng.gen_range(0..60));
            }
            if rng.gen_bool(0.3) {
                filter = filter.until(rng.gen_range(40..100));
            }
            if rng.gen_bool(0.3) {
                filter = filter.tag("t", topics.choose_multiple(rng, 2).copied());
            }
            filter
        };

        let manager = SubscriptionManager::new();
        let mut expected: HashMap<(ConnectionId, String), Vec<Filter>> = HashMap::new();
        let connections: Vec<ConnectionId> = (0..8).map(|_| ConnectionId::new()).collect();
        for _ in 0..40 {
            let conn = *connections.choose(&mut rng).unwrap();
            // Few ids per connection so some subscribes replace.
            let sub_id = format!("sub-{}", rng.gen_range(0..4));
            let filter_count = rng.gen_range(0..=2);
            let filters: Vec<Filter> = (0..filter_count)
                .map(|_| random_filter(&mut rng))
                .collect();
            manager.subscribe(conn, sub_id.clone(), filters.clone());
            expected.insert((conn, sub_id), filters);
        }
        assert_eq!(manager.total_subscriptions(), expected.len());

        for event in &events {
            let actual: HashSet<(ConnectionId, String)> = manager
                .get_matching_subscriptions(event)
                .iter()
                .map(|sub| (sub.connection_id, sub.subscription_id.clone()))
                .collect();
            let brute_force: HashSet<(ConnectionId, String)> = expected
                .iter()
                .filter(|(_, filters)| matches_filters(filters, event))
                .map(|(key, _)| key.clone())
                .collect();
            assert_eq!(actual, brute_force, "event {}", event.content);
        }
    }
}
