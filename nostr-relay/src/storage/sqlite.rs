//! SQLite storage backend for the relay.

use super::{EventStore, StoreOutcome};
use crate::error::StorageError;
use async_trait::async_trait;
use nostr_core::filter::{is_hex_prefix, matches_filter};
use nostr_types::{Event, Filter};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a full hex id or pubkey.
const FULL_HEX_LEN: usize = 64;

/// SQLite-based event storage.
///
/// Uses WAL mode for concurrent reads/writes. Tag values are indexed in a
/// side table so `#x` filters run in SQL.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                d_tag TEXT,
                expires_at INTEGER,
                raw TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(format!("events table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (event_id, name, value)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(format!("event_tags table: {e}")))?;

        // Create indexes
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC, id)",
            "CREATE INDEX IF NOT EXISTS idx_events_pubkey_kind ON events(pubkey, kind, d_tag)",
            "CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_events_expires ON events(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_event_tags_value ON event_tags(name, value)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }

        Ok(())
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Replaceable write: the newest event per slot wins, ties go to the lowest id.
    async fn store_replacing(
        &self,
        event: &Event,
        d_tag: Option<&str>,
    ) -> Result<StoreOutcome, StorageError> {
        let raw = serde_json::to_string(event)?;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM events WHERE id = ?1")
            .bind(&event.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StorageError::Database)?;
        if exists.is_some() {
            return Ok(StoreOutcome::Duplicate);
        }

        let current: Vec<(String, i64)> = match d_tag {
            Some(d) => sqlx::query_as(
                "SELECT id, created_at FROM events WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3",
            )
            .bind(&event.pubkey)
            .bind(i64::from(event.kind))
            .bind(d)
            .fetch_all(&mut *tx)
            .await
            .map_err(StorageError::Database)?,
            None => sqlx::query_as("SELECT id, created_at FROM events WHERE pubkey = ?1 AND kind = ?2")
                .bind(&event.pubkey)
                .bind(i64::from(event.kind))
                .fetch_all(&mut *tx)
                .await
                .map_err(StorageError::Database)?,
        };

        let created_at = to_db(event.created_at);
        let superseded = current.iter().any(|(id, ts)| {
            *ts > created_at || (*ts == created_at && id.as_str() < event.id.as_str())
        });
        if superseded {
            return Ok(StoreOutcome::Outdated);
        }

        for (id, _) in &current {
            sqlx::query("DELETE FROM events WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
        }

        insert_event(&mut *tx, event, &raw).await?;
        tx.commit().await.map_err(StorageError::Database)?;

        if !current.is_empty() {
            tracing::debug!(
                "Replaced {} event(s) for pubkey={} kind={}",
                current.len(),
                event.pubkey,
                event.kind
            );
        }
        Ok(StoreOutcome::Stored)
    }

    /// Run one filter, returning raw JSON of candidate rows.
    async fn fetch_raw(&self, filter: &Filter, now: u64) -> Result<Vec<String>, StorageError> {
        let Some(mut qb) = select_matching("raw", filter, now) else {
            return Ok(Vec::new());
        };
        qb.push(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(to_db(limit as u64));
        }

        qb.build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    async fn store_event(&self, event: &Event) -> Result<StoreOutcome, StorageError> {
        let raw = serde_json::to_string(event)?;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let inserted = insert_event(&mut *tx, event, &raw).await?;
        tx.commit().await.map_err(StorageError::Database)?;

        Ok(if inserted {
            StoreOutcome::Stored
        } else {
            StoreOutcome::Duplicate
        })
    }

    async fn store_replaceable_event(&self, event: &Event) -> Result<StoreOutcome, StorageError> {
        self.store_replacing(event, None).await
    }

    async fn store_parameterized_replaceable_event(
        &self,
        event: &Event,
    ) -> Result<StoreOutcome, StorageError> {
        self.store_replacing(event, Some(event.d_tag())).await
    }

    async fn query_events(&self, filters: &[Filter]) -> Result<Vec<Event>, StorageError> {
        let now = Self::current_timestamp();
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for filter in filters {
            for raw in self.fetch_raw(filter, now).await? {
                let event: Event = serde_json::from_str(&raw)?;
                // SQL LIKE is case-insensitive; the matcher is authoritative.
                if matches_filter(filter, &event) && seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }

        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn count_events(&self, filters: &[Filter]) -> Result<u64, StorageError> {
        let now = Self::current_timestamp();
        let mut seen = HashSet::new();

        for filter in filters {
            let Some(mut qb) = select_matching("id", filter, now) else {
                continue;
            };
            let ids = qb
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Database)?;
            seen.extend(ids);
        }

        Ok(seen.len() as u64)
    }

    async fn delete_expired(&self, now: u64) -> Result<u64, StorageError> {
        let result =
            sqlx::query("DELETE FROM events WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(to_db(now))
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn total_events(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count.max(0) as u64)
    }
}

/// Insert an event and its tag index rows. Returns false if the id exists.
async fn insert_event(
    conn: &mut SqliteConnection,
    event: &Event,
    raw: &str,
) -> Result<bool, StorageError> {
    let d_tag = event
        .is_parameterized_replaceable()
        .then(|| event.d_tag().to_string());

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, d_tag, expires_at, raw)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&event.id)
    .bind(&event.pubkey)
    .bind(to_db(event.created_at))
    .bind(i64::from(event.kind))
    .bind(d_tag)
    .bind(event.expiration().map(to_db))
    .bind(raw)
    .execute(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for tag in &event.tags {
        let (Some(name), Some(value)) = (tag.name(), tag.value()) else {
            continue;
        };
        sqlx::query("INSERT OR IGNORE INTO event_tags (event_id, name, value) VALUES (?1, ?2, ?3)")
            .bind(&event.id)
            .bind(name)
            .bind(value)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
    }

    Ok(true)
}

/// Build `SELECT <columns> FROM events WHERE ...` for one filter.
///
/// Returns `None` when the filter can match nothing.
fn select_matching(columns: &str, filter: &Filter, now: u64) -> Option<QueryBuilder<'static, Sqlite>> {
    if filter.is_unsatisfiable() || filter.limit == Some(0) {
        return None;
    }

    let mut qb = QueryBuilder::new(format!(
        "SELECT {columns} FROM events WHERE (expires_at IS NULL OR expires_at > "
    ));
    qb.push_bind(to_db(now)).push(")");

    if let Some(ids) = &filter.ids {
        push_prefix_clause(&mut qb, "id", ids)?;
    }
    if let Some(authors) = &filter.authors {
        push_prefix_clause(&mut qb, "pubkey", authors)?;
    }

    if let Some(kinds) = &filter.kinds {
        if kinds.is_empty() {
            return None;
        }
        qb.push(" AND kind IN (");
        let mut list = qb.separated(", ");
        for kind in kinds {
            list.push_bind(i64::from(*kind));
        }
        qb.push(")");
    }

    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ").push_bind(to_db(since));
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at <= ").push_bind(to_db(until));
    }

    for (name, values) in &filter.tags {
        if values.is_empty() {
            return None;
        }
        qb.push(" AND EXISTS (SELECT 1 FROM event_tags t WHERE t.event_id = events.id AND t.name = ")
            .push_bind(name.clone())
            .push(" AND t.value IN (");
        let mut list = qb.separated(", ");
        for value in values {
            list.push_bind(value.clone());
        }
        qb.push("))");
    }

    Some(qb)
}

/// ` AND (col = ? OR col LIKE ? ...)` over the well-formed prefixes.
fn push_prefix_clause(
    qb: &mut QueryBuilder<'static, Sqlite>,
    column: &str,
    prefixes: &[String],
) -> Option<()> {
    let valid: Vec<&String> = prefixes.iter().filter(|p| is_hex_prefix(p)).collect();
    if valid.is_empty() {
        return None;
    }

    qb.push(" AND (");
    let mut clause = qb.separated(" OR ");
    for prefix in valid {
        if prefix.len() == FULL_HEX_LEN {
            clause.push(format!("{column} = "));
            clause.push_bind_unseparated(prefix.clone());
        } else {
            clause.push(format!("{column} LIKE "));
            clause.push_bind_unseparated(format!("{prefix}%"));
        }
    }
    qb.push(")");
    Some(())
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
