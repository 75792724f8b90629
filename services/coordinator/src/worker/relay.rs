use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use rotation_core::retry::RetryPolicy;

use crate::domain::repository::{EventPublisher, OutboxRepository};
use crate::domain::types::{OutboxMessage, RelayStats};
use crate::error::{CoordinatorError, PublishError};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub batch_size: u64,
    /// PROCESSING rows older than this are assumed orphaned by a crashed relay.
    pub stuck_timeout: Duration,
    /// Delay before the next attempt, indexed by the attempt that just failed.
    pub backoff: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            stuck_timeout: Duration::from_secs(5 * 60),
            backoff: RetryPolicy::new(u32::MAX, Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(10 * 60)),
        }
    }
}

/// Moves committed outbox messages to the publisher.
///
/// Safe to run on many instances at once: every claim and transition is a
/// conditional update, so each message has one owner at a time.
pub struct OutboxRelay<R, P>
where
    R: OutboxRepository,
    P: EventPublisher,
{
    pub repo: R,
    pub publisher: P,
    pub settings: RelaySettings,
}

impl<R, P> OutboxRelay<R, P>
where
    R: OutboxRepository,
    P: EventPublisher,
{
    /// One pass with the configured batch size.
    pub async fn run_once(&self) -> Result<RelayStats, CoordinatorError> {
        self.run(self.settings.batch_size).await
    }

    pub async fn run(&self, batch_size: u64) -> Result<RelayStats, CoordinatorError> {
        let mut stats = RelayStats::default();
        let now = Utc::now();

        let stuck_before = now - to_chrono(self.settings.stuck_timeout);
        stats.reclaimed = self.repo.reclaim_stuck(stuck_before).await?;
        if stats.reclaimed > 0 {
            warn!(count = stats.reclaimed, "requeued stuck outbox messages");
        }

        let batch = self.repo.claim_batch(batch_size, now).await?;
        stats.claimed = batch.len() as u64;

        // Aggregates whose earlier message failed in this pass; later ones wait.
        let mut blocked: HashSet<(String, String)> = HashSet::new();
        for message in batch {
            let aggregate = (message.aggregate_type.clone(), message.aggregate_id.clone());
            if blocked.contains(&aggregate) {
                if self.repo.release(message.id).await? {
                    stats.released += 1;
                }
                continue;
            }

            match self.publisher.publish(&message).await {
                Ok(()) => {
                    if self.repo.mark_published(message.id, Utc::now()).await? {
                        stats.published += 1;
                    } else {
                        warn!(message_id = %message.id, "lost ownership before mark_published");
                    }
                }
                Err(err) => {
                    blocked.insert(aggregate);
                    self.handle_failure(&message, err, &mut stats).await?;
                }
            }
        }

        if stats.claimed > 0 || stats.reclaimed > 0 {
            info!(
                claimed = stats.claimed,
                published = stats.published,
                requeued = stats.requeued,
                dead_lettered = stats.dead_lettered,
                released = stats.released,
                reclaimed = stats.reclaimed,
                "outbox relay pass finished"
            );
        } else {
            debug!("outbox relay pass found nothing to do");
        }
        Ok(stats)
    }

    async fn handle_failure(
        &self,
        message: &OutboxMessage,
        err: PublishError,
        stats: &mut RelayStats,
    ) -> Result<(), CoordinatorError> {
        let reason = err.to_string();
        let permanent = matches!(err, PublishError::Permanent(_));

        if message.exhausted_after_failure() {
            if self.repo.mark_failed(message.id, &reason, Utc::now()).await? {
                stats.dead_lettered += 1;
                error!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    aggregate_id = %message.aggregate_id,
                    attempts = message.retry_count + 1,
                    permanent,
                    error = %reason,
                    "outbox message dead-lettered"
                );
            }
            return Ok(());
        }

        let attempt = (message.retry_count.max(0) as u32).saturating_add(1);
        let next_attempt_at = Utc::now() + to_chrono(self.settings.backoff.backoff(attempt));
        if self
            .repo
            .schedule_retry(message.id, next_attempt_at, &reason)
            .await?
        {
            stats.requeued += 1;
            warn!(
                message_id = %message.id,
                event_type = %message.event_type,
                attempt,
                %next_attempt_at,
                permanent,
                error = %reason,
                "outbox publish failed, will retry"
            );
        }
        Ok(())
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
