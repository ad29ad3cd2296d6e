//! Configuration loading for the relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and every field is optional; missing values take the defaults
//! below.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration for the relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Rate limiting and protocol limits.
    pub limits: LimitsConfig,
    /// NIP-77 negentropy configuration.
    pub negentropy: NegentropyConfig,
    /// NIP-11 relay information.
    pub info: InfoConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for WebSocket and HTTP (default: 0.0.0.0:7777).
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    pub database: PathBuf,
}

/// Rate limiting and protocol limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum new connections per IP address per minute (default: 10).
    pub connections_per_ip: u32,
    /// Maximum client messages per connection per minute (default: 300).
    pub messages_per_minute: u32,
    /// Maximum client messages per second across all connections (default: 1000).
    pub global_requests_per_second: u32,
    /// Maximum simultaneously open connections (default: 10000).
    pub max_concurrent_connections: usize,
    /// Maximum size of one WebSocket frame in bytes (default: 128 KiB).
    pub max_message_size: usize,
    /// Maximum live subscriptions per connection (default: 20).
    pub max_subscriptions: usize,
    /// Maximum filters in one REQ or COUNT (default: 10).
    pub max_filters: usize,
    /// Maximum subscription id length (default: 64).
    pub max_subid_length: usize,
    /// Limit applied to filters that carry none (default: 500).
    pub default_query_limit: usize,
    /// Upper clamp for any filter limit (default: 5000).
    pub max_query_limit: usize,
    /// How far in the future `created_at` may be, in seconds (default: 900).
    pub max_future_seconds: u64,
}

/// NIP-77 negentropy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NegentropyConfig {
    /// Accept NEG-OPEN (default: true).
    pub enabled: bool,
    /// Frame size limit for relay replies; 0 disables the cap (default: 60000).
    pub frame_size_limit: u64,
    /// Maximum stored events one sync session may cover (default: 500000).
    pub max_sync_events: usize,
    /// Maximum open sync sessions per connection (default: 8).
    pub max_sessions_per_connection: usize,
}

/// NIP-11 relay information document fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfoConfig {
    /// Relay name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Operator contact (URI or email).
    pub contact: Option<String>,
    /// Operator pubkey (hex).
    pub pubkey: Option<String>,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 3600 = 1 hour).
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:7777".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_max_message_size() -> usize {
    128 * 1024 // 128 KiB
}

/// NEG-MSG frames carry hex, so twice this plus the JSON wrapper has to fit
/// in `max_message_size`.
fn default_frame_size_limit() -> u64 {
    60_000
}

/// JSON wrapper around a NEG-MSG payload, excluding the subscription id.
const NEG_MSG_OVERHEAD: u64 = 128;

fn default_relay_name() -> String {
    "tessera".to_string()
}

fn default_relay_description() -> String {
    "Tessera Nostr relay".to_string()
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_ip: 10,
            messages_per_minute: 300,
            global_requests_per_second: 1000,
            max_concurrent_connections: 10_000,
            max_message_size: default_max_message_size(),
            max_subscriptions: 20,
            max_filters: 10,
            max_subid_length: 64,
            default_query_limit: 500,
            max_query_limit: 5000,
            max_future_seconds: 900,
        }
    }
}

impl Default for NegentropyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_size_limit: default_frame_size_limit(),
            max_sync_events: 500_000,
            max_sessions_per_connection: 8,
        }
    }
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
            description: default_relay_description(),
            contact: None,
            pubkey: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds values
    /// the relay cannot run with.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a limiter or break negentropy framing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.connections_per_ip == 0
            || limits.messages_per_minute == 0
            || limits.global_requests_per_second == 0
        {
            return Err(ConfigError::Invalid(
                "rate limits must be greater than zero".into(),
            ));
        }
        if limits.default_query_limit > limits.max_query_limit {
            return Err(ConfigError::Invalid(
                "default_query_limit exceeds max_query_limit".into(),
            ));
        }

        let frame = self.negentropy.frame_size_limit;
        if frame != 0 && frame < nostr_core::negentropy::MIN_FRAME_SIZE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "negentropy.frame_size_limit must be 0 or at least {}",
                nostr_core::negentropy::MIN_FRAME_SIZE_LIMIT
            )));
        }
        if frame != 0 {
            let largest_frame = frame
                .saturating_mul(2)
                .saturating_add(NEG_MSG_OVERHEAD)
                .saturating_add(limits.max_subid_length as u64);
            if largest_frame > limits.max_message_size as u64 {
                return Err(ConfigError::Invalid(format!(
                    "a full negentropy frame ({} bytes as hex) exceeds max_message_size ({})",
                    largest_frame, limits.max_message_size
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Parsed values are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:7777");
        assert_eq!(config.limits.max_message_size, 128 * 1024);
        assert_eq!(config.limits.connections_per_ip, 10);
        assert!(config.negentropy.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[storage]
database = "/data/relay.db"

[limits]
connections_per_ip = 5
max_subscriptions = 3

[negentropy]
frame_size_limit = 0

[info]
name = "test relay"
contact = "mailto:ops@example.com"

[cleanup]
interval_secs = 1800
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.storage.database, PathBuf::from("/data/relay.db"));
        assert_eq!(config.limits.connections_per_ip, 5);
        assert_eq!(config.limits.max_subscriptions, 3);
        assert_eq!(config.negentropy.frame_size_limit, 0);
        assert_eq!(config.info.name, "test relay");
        assert_eq!(config.info.contact.as_deref(), Some("mailto:ops@example.com"));
        assert_eq!(config.cleanup.interval_secs, 1800);
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_filters, 10);
        assert_eq!(config.negentropy.max_sessions_per_connection, 8);
        assert_eq!(config.cleanup.interval_secs, 3600);
    }

    #[test]
    fn validate_rejects_small_frame_limit() {
        let mut config = Config::default();
        config.negentropy.frame_size_limit = 1000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_frame_limit_fits_in_a_message() {
        let config = Config::default();
        let hex_frame = 2 * config.negentropy.frame_size_limit as usize;
        assert!(hex_frame + 64 <= config.limits.max_message_size);
    }

    #[test]
    fn validate_rejects_frame_limit_larger_than_message() {
        let mut config = Config::default();
        config.negentropy.frame_size_limit = 64 * 1024;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.limits.max_message_size = 256 * 1024;
        config.validate().unwrap();

        // Unlimited frames are the operator's call.
        config.negentropy.frame_size_limit = 0;
        config.limits.max_message_size = 1024;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_rate() {
        let mut config = Config::default();
        config.limits.messages_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_filters = 4").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.limits.max_filters, 4);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[limits]\nmax_filters = \"many\"").unwrap();
        assert!(matches!(
            Config::from_file(bad.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
