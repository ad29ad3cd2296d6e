//! NIP-11 relay information document.

use crate::config::Config;
use serde::Serialize;

/// NIPs this relay implements.
pub const SUPPORTED_NIPS: &[u32] = &[1, 11, 40, 45, 77];

/// Relay information document served for `Accept: application/nostr+json`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInformation {
    /// Relay name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Operator pubkey (hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    /// Operator contact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Implemented NIPs.
    pub supported_nips: Vec<u32>,
    /// Software identifier.
    pub software: String,
    /// Software version.
    pub version: String,
    /// Limits clients should respect.
    pub limitation: Limitation,
}

/// The `limitation` object of NIP-11.
#[derive(Debug, Clone, Serialize)]
pub struct Limitation {
    /// Maximum WebSocket frame size in bytes.
    pub max_message_length: usize,
    /// Maximum live subscriptions per connection.
    pub max_subscriptions: usize,
    /// Maximum filters per REQ.
    pub max_filters: usize,
    /// Upper clamp for filter limits.
    pub max_limit: usize,
    /// Maximum subscription id length.
    pub max_subid_length: usize,
    /// Limit applied when a filter has none.
    pub default_limit: usize,
    /// Maximum seconds `created_at` may lie in the future.
    pub created_at_upper_limit: u64,
    /// Always false: NIP-42 is not supported.
    pub auth_required: bool,
}

impl RelayInformation {
    /// Build the document from configuration.
    pub fn from_config(config: &Config) -> Self {
        let limits = &config.limits;
        let mut supported_nips = SUPPORTED_NIPS.to_vec();
        if !config.negentropy.enabled {
            supported_nips.retain(|nip| *nip != 77);
        }

        Self {
            name: config.info.name.clone(),
            description: config.info.description.clone(),
            pubkey: config.info.pubkey.clone(),
            contact: config.info.contact.clone(),
            supported_nips,
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            limitation: Limitation {
                max_message_length: limits.max_message_size,
                max_subscriptions: limits.max_subscriptions,
                max_filters: limits.max_filters,
                max_limit: limits.max_query_limit,
                max_subid_length: limits.max_subid_length,
                default_limit: limits.default_query_limit,
                created_at_upper_limit: limits.max_future_seconds,
                auth_required: false,
            },
        }
    }
}
