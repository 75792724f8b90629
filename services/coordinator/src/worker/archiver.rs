use chrono::{Duration, Utc};
use tracing::info;

use crate::domain::repository::OutboxRepository;
use crate::domain::types::ArchiveStats;
use crate::error::CoordinatorError;

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub batch_size: u64,
    /// Upper bound on batches per `run_maintenance` step.
    pub max_batches: u32,
    pub archive_after_hours: u32,
    pub archive_retention_days: u32,
    pub dead_letter_max_age_days: u32,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batches: 10,
            archive_after_hours: 24,
            archive_retention_days: 90,
            dead_letter_max_age_days: 30,
        }
    }
}

/// Keeps the live outbox table small. Each call is batch bounded and
/// idempotent; rows are re-selected against the predicate every time.
pub struct OutboxArchiver<R>
where
    R: OutboxRepository,
{
    pub repo: R,
    pub settings: ArchiveSettings,
}

impl<R> OutboxArchiver<R>
where
    R: OutboxRepository,
{
    /// Move PUBLISHED rows older than `older_than_hours` into the archive.
    pub async fn archive_published(
        &self,
        batch_size: u64,
        older_than_hours: u32,
    ) -> Result<u64, CoordinatorError> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(i64::from(older_than_hours));
        let archived = self.repo.archive_published(batch_size, cutoff, now).await?;
        if archived > 0 {
            info!(archived, %cutoff, "archived published outbox messages");
        }
        Ok(archived)
    }

    pub async fn prune_archive(
        &self,
        batch_size: u64,
        retention_days: u32,
    ) -> Result<u64, CoordinatorError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let pruned = self.repo.prune_archive(batch_size, cutoff).await?;
        if pruned > 0 {
            info!(pruned, %cutoff, "pruned outbox archive");
        }
        Ok(pruned)
    }

    pub async fn prune_dead_letters(
        &self,
        batch_size: u64,
        max_age_days: u32,
    ) -> Result<u64, CoordinatorError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let pruned = self.repo.prune_dead_letters(batch_size, cutoff).await?;
        if pruned > 0 {
            info!(pruned, %cutoff, "pruned dead-lettered outbox messages");
        }
        Ok(pruned)
    }

    /// All three steps with configured thresholds, each drained up to `max_batches`.
    pub async fn run_maintenance(&self) -> Result<ArchiveStats, CoordinatorError> {
        let s = &self.settings;
        let mut stats = ArchiveStats::default();
        for _ in 0..s.max_batches {
            let n = self
                .archive_published(s.batch_size, s.archive_after_hours)
                .await?;
            stats.archived += n;
            if n < s.batch_size {
                break;
            }
        }
        for _ in 0..s.max_batches {
            let n = self
                .prune_archive(s.batch_size, s.archive_retention_days)
                .await?;
            stats.archive_pruned += n;
            if n < s.batch_size {
                break;
            }
        }
        for _ in 0..s.max_batches {
            let n = self
                .prune_dead_letters(s.batch_size, s.dead_letter_max_age_days)
                .await?;
            stats.dead_letters_pruned += n;
            if n < s.batch_size {
                break;
            }
        }
        Ok(stats)
    }
}
