use std::sync::Arc;

use deadpool_redis::Pool as RedisPool;
use sea_orm::DatabaseConnection;

use rotation_core::retry::RetryPolicy;

use crate::config::{CacheBackend, CoordinatorConfig};
use crate::infra::cache::{LedgerBackend, LockBackend, RedisLedger, RedisLock};
use crate::infra::db::DbOutboxRepository;
use crate::infra::memory::{InMemoryLedger, InMemoryLock};
use crate::infra::publisher::{LogPublisher, PublisherBackend, RedisStreamPublisher};
use crate::infra::tx::TransactionScope;
use crate::usecase::swap::{SwapExecutor, SwapSettings};
use crate::worker::archiver::{ArchiveSettings, OutboxArchiver};
use crate::worker::monitor::{MonitorSettings, OutboxMonitor};
use crate::worker::relay::{OutboxRelay, RelaySettings};

/// Shared application state passed to every handler via axum `State` and
/// to the background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub locks: LockBackend,
    pub ledger: LedgerBackend,
    pub publisher: PublisherBackend,
    pub config: Arc<CoordinatorConfig>,
    pub monitor: Arc<OutboxMonitor<DbOutboxRepository>>,
}

impl AppState {
    /// Pick the lock, ledger and publisher backends once, from configuration.
    pub fn new(
        db: DatabaseConnection,
        redis: Option<RedisPool>,
        config: CoordinatorConfig,
    ) -> anyhow::Result<Self> {
        let (locks, ledger) = match (config.cache_backend, &redis) {
            (CacheBackend::Redis, Some(pool)) => (
                LockBackend::Redis(RedisLock { pool: pool.clone() }),
                LedgerBackend::Redis(RedisLedger { pool: pool.clone() }),
            ),
            (CacheBackend::Redis, None) => {
                anyhow::bail!("redis cache backend selected without a Redis pool")
            }
            (CacheBackend::Memory, _) => (
                LockBackend::InMemory(InMemoryLock::new()),
                LedgerBackend::InMemory(InMemoryLedger::new()),
            ),
        };
        let publisher = match (&config.outbox_stream, &redis) {
            (Some(stream), Some(pool)) => PublisherBackend::RedisStream(RedisStreamPublisher {
                pool: pool.clone(),
                stream: stream.clone(),
                max_len: config.outbox_stream_max_len,
            }),
            (Some(_), None) => anyhow::bail!("OUTBOX_STREAM set without a Redis pool"),
            (None, _) => PublisherBackend::Log(LogPublisher),
        };
        let monitor = OutboxMonitor::new(
            DbOutboxRepository { db: db.clone() },
            monitor_settings(&config),
        );
        Ok(Self {
            db,
            locks,
            ledger,
            publisher,
            config: Arc::new(config),
            monitor: Arc::new(monitor),
        })
    }

    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
        }
    }

    pub fn scope(&self) -> TransactionScope {
        TransactionScope::new(self.db.clone())
    }

    pub fn swap_executor(&self) -> SwapExecutor<LockBackend, LedgerBackend> {
        SwapExecutor {
            scope: self.scope(),
            locks: self.locks.clone(),
            ledger: self.ledger.clone(),
            settings: SwapSettings {
                lock_ttl: self.config.lock_ttl,
                lock_timeout: self.config.lock_timeout,
                idempotency_ttl: self.config.idempotency_ttl,
                rollback_window: chrono::Duration::hours(self.config.rollback_window_hours),
                retry: RetryPolicy::transactional(),
            },
        }
    }

    pub fn relay(&self) -> OutboxRelay<DbOutboxRepository, PublisherBackend> {
        OutboxRelay {
            repo: self.outbox_repo(),
            publisher: self.publisher.clone(),
            settings: RelaySettings {
                batch_size: self.config.relay_batch_size,
                stuck_timeout: self.config.relay_stuck_timeout,
                ..RelaySettings::default()
            },
        }
    }

    pub fn archiver(&self) -> OutboxArchiver<DbOutboxRepository> {
        OutboxArchiver {
            repo: self.outbox_repo(),
            settings: ArchiveSettings {
                batch_size: self.config.archive_batch_size,
                archive_after_hours: self.config.archive_after_hours,
                archive_retention_days: self.config.archive_retention_days,
                dead_letter_max_age_days: self.config.dead_letter_max_age_days,
                ..ArchiveSettings::default()
            },
        }
    }
}

fn monitor_settings(config: &CoordinatorConfig) -> MonitorSettings {
    MonitorSettings {
        stuck_after: config.relay_stuck_timeout,
        latency_warning_secs: config.monitor_latency_warning_secs,
        latency_critical_secs: config.monitor_latency_critical_secs,
        dead_letter_warning: config.monitor_dead_letter_warning,
        ..MonitorSettings::default()
    }
}
