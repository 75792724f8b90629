use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseTransaction;
use serde_json::{Value, json};
use tracing::{info, warn};

use rotation_core::retry::RetryPolicy;
use rotation_domain::id::{PersonId, SwapId};
use rotation_domain::swap::{SwapStatus, SwapType};

use crate::domain::repository::{DistributedLock, IdempotencyLedger};
use crate::domain::types::{
    AcquireMode, Assignment, LockToken, NewOutboxMessage, RollbackRequest, SwapOutcome,
    SwapRecord, SwapRequest, events, rollback_operation_id,
};
use crate::error::CoordinatorError;
use crate::infra::db;
use crate::infra::tx::TransactionScope;

#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub lock_ttl: Duration,
    pub lock_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub rollback_window: chrono::Duration,
    pub retry: RetryPolicy,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            rollback_window: chrono::Duration::hours(24),
            retry: RetryPolicy::transactional(),
        }
    }
}

/// Executes multi-row swaps exactly once (effectively) and compensates them.
///
/// Discipline for both operations: validate, consult the ledger, lock every
/// contended slot in sorted order, consult the ledger again, mutate inside a
/// retried transaction together with the outbox event, record the result,
/// release the locks.
pub struct SwapExecutor<L, I>
where
    L: DistributedLock,
    I: IdempotencyLedger,
{
    pub scope: TransactionScope,
    pub locks: L,
    pub ledger: I,
    pub settings: SwapSettings,
}

impl<L, I> SwapExecutor<L, I>
where
    L: DistributedLock,
    I: IdempotencyLedger,
{
    pub async fn execute_swap(&self, request: SwapRequest) -> Result<SwapOutcome, CoordinatorError> {
        request.validate()?;
        let operation_id = request.operation_id();

        if let Some(outcome) = self.replay(&operation_id).await? {
            info!(%operation_id, "swap already executed, returning cached result");
            return Ok(outcome);
        }

        let held = self.lock_all(&request.slot_keys()).await?;
        let result = self.execute_locked(&request, &operation_id).await;
        self.release_all(held).await;

        let outcome = result?;
        info!(
            %operation_id,
            swap_id = %outcome.swap_id,
            swap_type = %outcome.swap_type,
            "swap executed"
        );
        Ok(outcome)
    }

    pub async fn rollback_swap(
        &self,
        swap_id: SwapId,
        request: RollbackRequest,
    ) -> Result<SwapOutcome, CoordinatorError> {
        let operation_id = rollback_operation_id(swap_id);

        if let Some(outcome) = self.replay(&operation_id).await? {
            info!(%operation_id, "rollback already applied, returning cached result");
            return Ok(outcome);
        }

        let record = db::find_swap_record(self.scope.connection(), swap_id)
            .await?
            .ok_or_else(|| CoordinatorError::not_found("swap", swap_id))?;
        let keys = record.slot_keys();

        let held = self.lock_all(&keys).await?;
        let result = self.rollback_locked(swap_id, &request, &operation_id).await;
        self.release_all(held).await;

        let outcome = result?;
        info!(%operation_id, %swap_id, "swap rolled back");
        Ok(outcome)
    }

    async fn execute_locked(
        &self,
        request: &SwapRequest,
        operation_id: &str,
    ) -> Result<SwapOutcome, CoordinatorError> {
        // A concurrent duplicate may have finished while we waited for the locks.
        if let Some(outcome) = self.replay(operation_id).await? {
            return Ok(outcome);
        }

        let outcome = self
            .scope
            .run_with_retry(&self.settings.retry, |txn| {
                let request = request.clone();
                let operation_id = operation_id.to_owned();
                Box::pin(async move { apply_swap(txn, &request, &operation_id, Utc::now()).await })
            })
            .await?;

        self.remember(operation_id, &outcome).await;
        Ok(outcome)
    }

    async fn rollback_locked(
        &self,
        swap_id: SwapId,
        request: &RollbackRequest,
        operation_id: &str,
    ) -> Result<SwapOutcome, CoordinatorError> {
        if let Some(outcome) = self.replay(operation_id).await? {
            return Ok(outcome);
        }

        let window = self.settings.rollback_window;
        let outcome = self
            .scope
            .run_with_retry(&self.settings.retry, |txn| {
                let request = request.clone();
                Box::pin(
                    async move { apply_rollback(txn, swap_id, &request, window, Utc::now()).await },
                )
            })
            .await?;

        self.remember(operation_id, &outcome).await;
        Ok(outcome)
    }

    async fn replay(&self, operation_id: &str) -> Result<Option<SwapOutcome>, CoordinatorError> {
        let Some(cached) = self.ledger.cached_result(operation_id).await? else {
            return Ok(None);
        };
        let outcome = serde_json::from_value(cached).map_err(|e| CoordinatorError::Internal(e.into()))?;
        Ok(Some(outcome))
    }

    /// The mutation is already committed; a ledger failure here only weakens
    /// duplicate detection to the durable swap record.
    async fn remember(&self, operation_id: &str, outcome: &SwapOutcome) {
        let value = match serde_json::to_value(outcome) {
            Ok(value) => value,
            Err(err) => {
                warn!(%operation_id, error = %err, "could not serialize swap outcome");
                return;
            }
        };
        if let Err(err) = self
            .ledger
            .mark_completed(operation_id, &value, self.settings.idempotency_ttl)
            .await
        {
            warn!(%operation_id, error = %err, "could not record completed operation");
        }
    }

    /// Acquire `keys` in the given (sorted) order; on failure release what was taken.
    async fn lock_all(&self, keys: &[String]) -> Result<Vec<(String, LockToken)>, CoordinatorError> {
        let mode = AcquireMode::Blocking {
            timeout: self.settings.lock_timeout,
        };
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            match self.locks.acquire(key, self.settings.lock_ttl, mode).await {
                Ok(token) => held.push((key.clone(), token)),
                Err(err) => {
                    self.release_all(held).await;
                    return Err(err);
                }
            }
        }
        Ok(held)
    }

    async fn release_all(&self, held: Vec<(String, LockToken)>) {
        for (key, token) in held.into_iter().rev() {
            match self.locks.release(&key, &token).await {
                Ok(true) => {}
                Ok(false) => warn!(%key, "lock expired before release"),
                Err(err) => warn!(%key, error = %err, "lock release failed"),
            }
        }
    }
}

async fn require_slot(
    txn: &DatabaseTransaction,
    person: PersonId,
    week: chrono::NaiveDate,
) -> Result<Assignment, CoordinatorError> {
    db::lock_assignment_slot(txn, person, week)
        .await?
        .ok_or_else(|| CoordinatorError::not_found("assignment", format!("{person}@{week}")))
}

async fn require_free(
    txn: &DatabaseTransaction,
    person: PersonId,
    week: chrono::NaiveDate,
) -> Result<(), CoordinatorError> {
    if db::lock_assignment_slot(txn, person, week).await?.is_some() {
        return Err(CoordinatorError::Validation(format!(
            "{person} is already assigned in week {week}"
        )));
    }
    Ok(())
}

async fn apply_swap(
    txn: &DatabaseTransaction,
    request: &SwapRequest,
    operation_id: &str,
    now: DateTime<Utc>,
) -> Result<SwapOutcome, CoordinatorError> {
    // Durable duplicate check for when the ledger entry has already expired.
    if let Some(existing) = db::find_swap_by_operation(txn, operation_id).await? {
        return Ok(SwapOutcome::from(&existing));
    }

    // Trading two slots of the same week leaves nobody double-booked.
    let same_week = request.target_week == Some(request.source_week);

    let source = require_slot(txn, request.source_person_id, request.source_week).await?;
    if !same_week {
        require_free(txn, request.target_person_id, request.source_week).await?;
    }

    let target = match (request.swap_type, request.target_week) {
        (SwapType::OneToOne, Some(target_week)) => {
            let target = require_slot(txn, request.target_person_id, target_week).await?;
            if !same_week {
                require_free(txn, request.source_person_id, target_week).await?;
            }
            Some(target)
        }
        _ => None,
    };

    let moved_source = db::reassign(txn, &source, request.target_person_id, now).await?;
    let moved_target = match &target {
        Some(target) => Some(db::reassign(txn, target, request.source_person_id, now).await?),
        None => None,
    };

    let record = SwapRecord {
        id: SwapId::new(),
        operation_id: operation_id.to_owned(),
        swap_type: request.swap_type,
        status: SwapStatus::Executed,
        source_person_id: request.source_person_id,
        source_week: request.source_week,
        target_person_id: request.target_person_id,
        target_week: request.target_week,
        source_assignment_id: source.id,
        target_assignment_id: target.as_ref().map(|t| t.id),
        requested_by: request.requested_by,
        reason: request.reason.clone(),
        executed_at: now,
        rolled_back_at: None,
        rolled_back_by: None,
        rollback_reason: None,
    };
    db::insert_swap_record(txn, &record).await?;

    let mut assignments = vec![assignment_json(&moved_source)];
    assignments.extend(moved_target.as_ref().map(assignment_json));
    let event = NewOutboxMessage::new(
        events::SWAP_EXECUTED,
        events::AGGREGATE_SWAP,
        record.id,
        json!({
            "swap_id": record.id,
            "swap_type": record.swap_type,
            "source_person_id": record.source_person_id,
            "source_week": record.source_week,
            "target_person_id": record.target_person_id,
            "target_week": record.target_week,
            "requested_by": record.requested_by,
            "reason": record.reason,
            "executed_at": record.executed_at,
            "assignments": assignments,
        }),
    )
    .with_header("operation_id", operation_id);
    db::enqueue(txn, &event).await?;

    Ok(SwapOutcome::from(&record))
}

async fn apply_rollback(
    txn: &DatabaseTransaction,
    swap_id: SwapId,
    request: &RollbackRequest,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<SwapOutcome, CoordinatorError> {
    let record = db::find_swap_record(txn, swap_id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found("swap", swap_id))?;
    if record.status == SwapStatus::RolledBack {
        return Ok(SwapOutcome::from(&record));
    }
    if now - record.executed_at > window {
        return Err(CoordinatorError::Validation(format!(
            "swap {swap_id} is outside the {}h rollback window",
            window.num_hours()
        )));
    }

    let source = db::lock_assignment(txn, record.source_assignment_id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found("assignment", record.source_assignment_id))?;
    expect_holder(&source, record.target_person_id)?;
    let same_week = record.target_week == Some(record.source_week);
    if !same_week {
        require_free(txn, record.source_person_id, record.source_week).await?;
    }

    let target = match record.target_assignment_id {
        Some(id) => {
            let target = db::lock_assignment(txn, id)
                .await?
                .ok_or_else(|| CoordinatorError::not_found("assignment", id))?;
            expect_holder(&target, record.source_person_id)?;
            if let (Some(target_week), false) = (record.target_week, same_week) {
                require_free(txn, record.target_person_id, target_week).await?;
            }
            Some(target)
        }
        None => None,
    };

    let restored_source = db::reassign(txn, &source, record.source_person_id, now).await?;
    let restored_target = match &target {
        Some(target) => Some(db::reassign(txn, target, record.target_person_id, now).await?),
        None => None,
    };

    let reason = request.reason.as_deref();
    if !db::mark_swap_rolled_back(txn, swap_id, request.rolled_back_by, reason, now).await? {
        return Err(CoordinatorError::Validation(format!(
            "swap {swap_id} was rolled back concurrently"
        )));
    }

    let mut assignments = vec![assignment_json(&restored_source)];
    assignments.extend(restored_target.as_ref().map(assignment_json));
    let event = NewOutboxMessage::new(
        events::SWAP_ROLLED_BACK,
        events::AGGREGATE_SWAP,
        swap_id,
        json!({
            "swap_id": swap_id,
            "rolled_back_by": request.rolled_back_by,
            "reason": request.reason,
            "rolled_back_at": now,
            "assignments": assignments,
        }),
    )
    .with_header("operation_id", rollback_operation_id(swap_id));
    db::enqueue(txn, &event).await?;

    Ok(SwapOutcome {
        status: SwapStatus::RolledBack,
        rolled_back_at: Some(now),
        ..SwapOutcome::from(&record)
    })
}

/// Rollback only restores rows still held the way the swap left them.
fn expect_holder(assignment: &Assignment, person: PersonId) -> Result<(), CoordinatorError> {
    if assignment.person_id != person {
        return Err(CoordinatorError::Validation(format!(
            "assignment {} changed hands after the swap",
            assignment.id
        )));
    }
    Ok(())
}

fn assignment_json(assignment: &Assignment) -> Value {
    json!({
        "assignment_id": assignment.id,
        "person_id": assignment.person_id,
        "week_start": assignment.week_start,
        "version": assignment.version,
    })
}
