//! tessera-relay binary entry point.
//!
//! Usage:
//! ```bash
//! tessera-relay --config relay.toml
//! tessera-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_nostr_relay::cleanup::spawn_cleanup_task;
use tessera_nostr_relay::config::Config;
use tessera_nostr_relay::http::build_router;
use tessera_nostr_relay::http::health::init_start_time;
use tessera_nostr_relay::server::Relay;
use tessera_nostr_relay::storage::SqliteStorage;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Nostr relay with NIP-77 negentropy sync.
#[derive(Parser, Debug)]
#[command(name = "tessera-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_start_time();

    let database = &config.storage.database;
    let storage = SqliteStorage::new(database)
        .await
        .with_context(|| format!("failed to open database {}", database.display()))?;

    let bind_address = config.server.bind_address.clone();
    let cleanup_config = config.cleanup.clone();
    let relay = Arc::new(Relay::new(config, storage));

    let _cleanup = spawn_cleanup_task(
        relay.storage_arc(),
        relay.rate_limits().clone(),
        cleanup_config,
    );

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(
        "tessera-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        bind_address
    );

    let app = build_router(relay);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Relay stopped");
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let config = Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    } else {
        tracing::warn!(
            "Configuration file {} not found, using defaults",
            path.display()
        );
        Ok(Config::default())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
