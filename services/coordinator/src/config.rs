use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;

/// Which store backs the distributed lock and the idempotency ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown CACHE_BACKEND {other:?} (expected redis or memory)"),
        }
    }
}

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Relational store URL. Env var: `DATABASE_URL`.
    pub database_url: String,
    /// Env var: `REDIS_URL`. Required when the cache backend is Redis or the
    /// outbox stream is enabled.
    pub redis_url: Option<String>,
    /// Env var: `CACHE_BACKEND` (`redis` | `memory`, default `redis`).
    pub cache_backend: CacheBackend,
    /// Env var: `COORDINATOR_PORT` (default 3120).
    pub port: u16,
    /// Redis stream receiving published events. Env var: `OUTBOX_STREAM`.
    /// Unset means events are only logged.
    pub outbox_stream: Option<String>,
    /// Env var: `OUTBOX_STREAM_MAXLEN`.
    pub outbox_stream_max_len: Option<u64>,
    /// Env var: `LOG_FORMAT` (`json` | `compact`).
    pub log_format: String,

    pub relay_interval: Duration,
    pub relay_batch_size: u64,
    pub relay_stuck_timeout: Duration,

    /// Period of the archive/prune maintenance pass under `serve`.
    pub archive_interval: Duration,
    pub archive_batch_size: u64,
    pub archive_after_hours: u32,
    pub archive_retention_days: u32,
    pub dead_letter_max_age_days: u32,

    pub monitor_interval: Duration,
    pub monitor_latency_warning_secs: f64,
    pub monitor_latency_critical_secs: f64,
    pub monitor_dead_letter_warning: u64,

    pub lock_ttl: Duration,
    pub lock_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub rollback_window_hours: i64,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    parsed(name, default).map(Duration::from_secs)
}

fn millis(name: &str, default: u64) -> anyhow::Result<Duration> {
    parsed(name, default).map(Duration::from_millis)
}

impl CoordinatorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let cache_backend = match var("CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => CacheBackend::Redis,
        };
        let redis_url = var("REDIS_URL");
        let outbox_stream = var("OUTBOX_STREAM");
        if (cache_backend == CacheBackend::Redis || outbox_stream.is_some()) && redis_url.is_none()
        {
            anyhow::bail!("REDIS_URL is required with CACHE_BACKEND=redis or OUTBOX_STREAM set");
        }

        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL is not set")?,
            redis_url,
            cache_backend,
            port: parsed("COORDINATOR_PORT", 3120)?,
            outbox_stream,
            outbox_stream_max_len: var("OUTBOX_STREAM_MAXLEN")
                .map(|raw| raw.trim().parse::<u64>())
                .transpose()
                .context("invalid OUTBOX_STREAM_MAXLEN")?,
            log_format: var("LOG_FORMAT").unwrap_or_else(|| "json".to_owned()),

            relay_interval: secs("RELAY_INTERVAL_SECS", 60)?,
            relay_batch_size: parsed("RELAY_BATCH_SIZE", 100)?,
            relay_stuck_timeout: secs("RELAY_STUCK_TIMEOUT_SECS", 300)?,

            archive_interval: secs("ARCHIVE_INTERVAL_SECS", 6 * 60 * 60)?,
            archive_batch_size: parsed("ARCHIVE_BATCH_SIZE", 1000)?,
            archive_after_hours: parsed("ARCHIVE_AFTER_HOURS", 24)?,
            archive_retention_days: parsed("ARCHIVE_RETENTION_DAYS", 90)?,
            dead_letter_max_age_days: parsed("DEAD_LETTER_MAX_AGE_DAYS", 30)?,

            monitor_interval: secs("MONITOR_INTERVAL_SECS", 60)?,
            monitor_latency_warning_secs: parsed("MONITOR_LATENCY_WARNING_SECS", 300.0)?,
            monitor_latency_critical_secs: parsed("MONITOR_LATENCY_CRITICAL_SECS", 1800.0)?,
            monitor_dead_letter_warning: parsed("MONITOR_DEAD_LETTER_WARNING", 10)?,

            lock_ttl: millis("LOCK_TTL_MS", 30_000)?,
            lock_timeout: millis("LOCK_TIMEOUT_MS", 5_000)?,
            idempotency_ttl: secs("IDEMPOTENCY_TTL_SECS", 24 * 60 * 60)?,
            rollback_window_hours: parsed("ROLLBACK_WINDOW_HOURS", 24)?,
        })
    }
}
