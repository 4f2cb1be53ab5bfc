// Durable event log backing chat retention, change archival, and gauge
// publication. Writes here are best-effort: callers log failures and the
// live broadcast path never waits on them.

use std::{
    collections::HashMap,
    env,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    migrate::Migrator,
    postgres::{PgPool, PgPoolOptions},
};
use tokio::sync::RwLock;

pub static MIGRATOR: Migrator = sqlx::migrate!("./src/store/migrations");

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
struct LogEntry {
    payload: Value,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    streams: HashMap<String, Vec<LogEntry>>,
    gauges: HashMap<String, i64>,
}

/// Append-only log of room events with per-entry TTLs, plus a small gauge
/// table for liveness reporting.
///
/// Backed by PostgreSQL when `STRATA_HUB_DATABASE_URL` is configured, and
/// by process memory otherwise (development and tests).
#[derive(Clone)]
pub enum EventLog {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryLog>>),
}

impl EventLog {
    /// Connect to the configured backend, applying migrations when a
    /// database URL is present.
    pub async fn connect(database_url: Option<&str>) -> Result<Self> {
        match database_url {
            Some(url) => {
                let pool = create_pg_pool(url).await?;
                MIGRATOR
                    .run(&pool)
                    .await
                    .context("failed to apply hub postgres migrations")?;
                Ok(Self::Postgres(pool))
            }
            None => Ok(Self::in_memory()),
        }
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryLog::default())))
    }

    /// Append a payload to a stream with the given retention. Entries past
    /// their expiry for the same stream are pruned on the way in.
    pub async fn append(&self, stream_key: &str, payload: Value, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).context("event retention duration out of range")?;

        match self {
            Self::Postgres(pool) => {
                sqlx::query("DELETE FROM event_log WHERE stream_key = $1 AND expires_at <= $2")
                    .bind(stream_key)
                    .bind(now)
                    .execute(pool)
                    .await
                    .context("failed to prune expired event log entries")?;

                sqlx::query(
                    "INSERT INTO event_log (stream_key, payload, recorded_at, expires_at) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(stream_key)
                .bind(&payload)
                .bind(now)
                .bind(expires_at)
                .execute(pool)
                .await
                .context("failed to append event log entry")?;

                Ok(())
            }
            Self::Memory(log) => {
                let mut guard = log.write().await;
                let stream = guard.streams.entry(stream_key.to_string()).or_default();
                stream.retain(|entry| entry.expires_at > now);
                stream.push(LogEntry { payload, expires_at });
                Ok(())
            }
        }
    }

    /// Most recent unexpired payloads for a stream, oldest first.
    pub async fn recent(&self, stream_key: &str, limit: usize) -> Result<Vec<Value>> {
        let now = Utc::now();

        match self {
            Self::Postgres(pool) => {
                let rows: Vec<(Value,)> = sqlx::query_as(
                    "SELECT payload FROM ( \
                         SELECT payload, recorded_at FROM event_log \
                         WHERE stream_key = $1 AND expires_at > $2 \
                         ORDER BY recorded_at DESC LIMIT $3 \
                     ) AS recent ORDER BY recorded_at ASC",
                )
                .bind(stream_key)
                .bind(now)
                .bind(limit as i64)
                .fetch_all(pool)
                .await
                .context("failed to read recent event log entries")?;

                Ok(rows.into_iter().map(|(payload,)| payload).collect())
            }
            Self::Memory(log) => {
                let guard = log.read().await;
                let Some(stream) = guard.streams.get(stream_key) else {
                    return Ok(Vec::new());
                };

                let live: Vec<_> = stream
                    .iter()
                    .filter(|entry| entry.expires_at > now)
                    .map(|entry| entry.payload.clone())
                    .collect();
                let skip = live.len().saturating_sub(limit);
                Ok(live.into_iter().skip(skip).collect())
            }
        }
    }

    /// Publish a named gauge sample, replacing any previous value.
    pub async fn put_gauge(&self, name: &str, value: i64) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO engine_gauges (name, value, updated_at) VALUES ($1, $2, $3) \
                     ON CONFLICT (name) DO UPDATE SET value = $2, updated_at = $3",
                )
                .bind(name)
                .bind(value)
                .bind(Utc::now())
                .execute(pool)
                .await
                .context("failed to publish gauge sample")?;
                Ok(())
            }
            Self::Memory(log) => {
                log.write().await.gauges.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn gauge_for_tests(&self, name: &str) -> Option<i64> {
        match self {
            Self::Postgres(_) => None,
            Self::Memory(log) => log.read().await.gauges.get(name).copied(),
        }
    }
}

async fn create_pg_pool(database_url: &str) -> Result<PgPool> {
    let min_connections = env::var("STRATA_HUB_DB_MIN_CONNECTIONS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_MIN_CONNECTIONS);

    let max_connections = env::var("STRATA_HUB_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_MAX_CONNECTIONS);

    let acquire_timeout_secs = env::var("STRATA_HUB_DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

    PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
        .context("failed to connect to hub PostgreSQL")
}
