#![allow(async_fn_in_trait)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use rotation_core::retry::RetryPolicy;
use rotation_domain::id::MessageId;

use crate::domain::types::{
    AcquireMode, LockToken, OutboxMessage, OutboxSnapshot, SnapshotCutoffs,
};
use crate::error::{CoordinatorError, PublishError};

/// Cross-process mutual exclusion keyed by string, with TTL expiry.
pub trait DistributedLock: Send + Sync {
    /// Set-if-absent-or-expired. `None` when someone else holds the key.
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinatorError>;

    /// Compare-and-delete. Returns `false` (and does nothing) on token mismatch.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinatorError>;

    /// Push the expiry `additional` into the future if `token` still holds the key.
    async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        additional: Duration,
    ) -> Result<bool, CoordinatorError>;

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError>;

    /// Acquire according to `mode`. Blocking mode polls with capped backoff and
    /// fails with `LockAcquisitionFailed` once `timeout` has elapsed.
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        mode: AcquireMode,
    ) -> Result<LockToken, CoordinatorError> {
        let timeout = match mode {
            AcquireMode::NonBlocking => Duration::ZERO,
            AcquireMode::Blocking { timeout } => timeout,
        };
        let started = tokio::time::Instant::now();
        let poll = RetryPolicy::new(u32::MAX, Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(250))
            .with_jitter(true);
        let mut attempt = 0u32;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await? {
                return Ok(token);
            }
            attempt = attempt.saturating_add(1);
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoordinatorError::LockAcquisitionFailed {
                    key: key.to_owned(),
                    waited,
                });
            }
            let remaining = timeout - waited;
            tokio::time::sleep(poll.backoff(attempt).min(remaining)).await;
        }
    }
}

/// Record of completed logical operations and their results.
pub trait IdempotencyLedger: Send + Sync {
    async fn is_duplicate(&self, operation_id: &str) -> Result<bool, CoordinatorError>;

    async fn mark_completed(
        &self,
        operation_id: &str,
        result: &Value,
        ttl: Duration,
    ) -> Result<(), CoordinatorError>;

    async fn cached_result(&self, operation_id: &str) -> Result<Option<Value>, CoordinatorError>;
}

/// Relay, archiver and monitor access to the outbox tables.
///
/// Every status change is a conditional update guarded on the current status,
/// so the `bool`/count results tell the caller whether it actually won.
pub trait OutboxRepository: Send + Sync {
    /// Requeue PROCESSING rows claimed before `started_before`. Returns rows requeued.
    async fn reclaim_stuck(&self, started_before: DateTime<Utc>) -> Result<u64, CoordinatorError>;

    /// Claim up to `limit` due PENDING rows in `(aggregate, sequence)` order,
    /// skipping any row with an earlier unfinished sibling outside the batch.
    async fn claim_batch(
        &self,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, CoordinatorError>;

    async fn mark_published(
        &self,
        id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError>;

    /// PROCESSING → PENDING with `retry_count` bumped and a backoff hint.
    async fn schedule_retry(
        &self,
        id: MessageId,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, CoordinatorError>;

    /// PROCESSING → FAILED (dead letter).
    async fn mark_failed(
        &self,
        id: MessageId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError>;

    /// PROCESSING → PENDING without touching `retry_count`.
    async fn release(&self, id: MessageId) -> Result<bool, CoordinatorError>;

    async fn archive_published(
        &self,
        limit: u64,
        published_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError>;

    async fn prune_archive(
        &self,
        limit: u64,
        archived_before: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError>;

    async fn prune_dead_letters(
        &self,
        limit: u64,
        failed_before: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError>;

    /// Aggregate figures only; the cost does not grow with the backlog.
    async fn snapshot(&self, cutoffs: SnapshotCutoffs) -> Result<OutboxSnapshot, CoordinatorError>;
}

/// Transport that delivers outbox messages downstream. Must tolerate redelivery.
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}
