//! Background cleanup task.
//!
//! Runs periodically to delete NIP-40 expired events and evict idle
//! rate limiter entries.

use crate::config::CleanupConfig;
use crate::limits::RateLimits;
use crate::storage::{EventStore, SqliteStorage};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    storage: Arc<SqliteStorage>,
    rate_limits: RateLimits,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_cleanup(&storage, &rate_limits).await;
        }
    })
}

/// One cleanup pass. Returns the number of events deleted.
pub async fn run_cleanup(storage: &SqliteStorage, rate_limits: &RateLimits) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    rate_limits.shrink();

    match storage.delete_expired(now).await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!("Cleanup: deleted {} expired events", deleted);
            } else {
                tracing::debug!("Cleanup: no expired events");
            }
            deleted
        }
        Err(e) => {
            tracing::error!("Cleanup error: {}", e);
            0
        }
    }
}
