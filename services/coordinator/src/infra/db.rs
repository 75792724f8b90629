use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, SqlErr, Statement, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use rotation_coordinator_schema::{assignments, outbox_archive, outbox_messages, swap_records};
use rotation_domain::id::{AssignmentId, MessageId, PersonId, SwapId};
use rotation_domain::outbox::OutboxStatus;
use rotation_domain::swap::SwapStatus;

use crate::domain::repository::OutboxRepository;
use crate::domain::types::{
    Assignment, NewOutboxMessage, OutboxMessage, OutboxSnapshot, SnapshotCutoffs, SwapRecord,
};
use crate::error::CoordinatorError;

// ── Outbox writes (mutation side) ─────────────────────────────────────────────

/// Insert an outbox message inside the caller's transaction.
///
/// `sequence` is one past the aggregate's current maximum. Two writers racing
/// on the same aggregate collide on the unique index; that surfaces as
/// `Transient` so `run_with_retry` re-runs the whole mutation.
pub async fn enqueue(
    txn: &DatabaseTransaction,
    message: &NewOutboxMessage,
) -> Result<OutboxMessage, CoordinatorError> {
    let last: Option<Option<i64>> = outbox_messages::Entity::find()
        .select_only()
        .column_as(Expr::col(outbox_messages::Column::Sequence).max(), "max_sequence")
        .filter(outbox_messages::Column::AggregateType.eq(message.aggregate_type.as_str()))
        .filter(outbox_messages::Column::AggregateId.eq(message.aggregate_id.as_str()))
        .into_tuple()
        .one(txn)
        .await?;
    let sequence = last.flatten().unwrap_or(0) + 1;

    let now = Utc::now();
    let model = outbox_messages::ActiveModel {
        id: Set(MessageId::new().into()),
        event_type: Set(message.event_type.clone()),
        aggregate_type: Set(message.aggregate_type.clone()),
        aggregate_id: Set(message.aggregate_id.clone()),
        sequence: Set(sequence),
        payload: Set(message.payload.clone()),
        headers: Set(Value::Object(message.headers.clone())),
        status: Set(OutboxStatus::Pending.as_str().to_owned()),
        retry_count: Set(0),
        max_retries: Set(message.max_retries),
        last_error: Set(None),
        next_attempt_at: Set(now),
        created_at: Set(now),
        processing_started_at: Set(None),
        published_at: Set(None),
        failed_at: Set(None),
    }
    .insert(txn)
    .await
    .map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            CoordinatorError::Transient(format!("outbox sequence collision: {detail}"))
        }
        _ => CoordinatorError::from(err),
    })?;

    message_from_model(model)
}

fn message_from_model(model: outbox_messages::Model) -> Result<OutboxMessage, CoordinatorError> {
    let status = model
        .status
        .parse::<OutboxStatus>()
        .map_err(|e| CoordinatorError::Internal(e.into()))?;
    Ok(OutboxMessage {
        id: MessageId(model.id),
        event_type: model.event_type,
        aggregate_type: model.aggregate_type,
        aggregate_id: model.aggregate_id,
        sequence: model.sequence,
        payload: model.payload,
        headers: model.headers,
        status,
        retry_count: model.retry_count,
        max_retries: model.max_retries,
        last_error: model.last_error,
        next_attempt_at: model.next_attempt_at,
        created_at: model.created_at,
        processing_started_at: model.processing_started_at,
        published_at: model.published_at,
        failed_at: model.failed_at,
    })
}

// ── Outbox repository (relay / archiver / monitor side) ───────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

#[derive(Debug, Default, FromQueryResult)]
struct PendingAgeRow {
    oldest: Option<DateTime<Utc>>,
    avg_age_secs: Option<f64>,
}

const UNFINISHED: [OutboxStatus; 2] = [OutboxStatus::Pending, OutboxStatus::Processing];

fn status_in(statuses: &[OutboxStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

impl DbOutboxRepository {
    /// Conditional single-row transition `from → to`; `true` only for the winner.
    async fn transition(
        &self,
        id: MessageId,
        from: OutboxStatus,
        changes: outbox_messages::ActiveModel,
        bump_retry: bool,
    ) -> Result<bool, CoordinatorError> {
        let mut update = outbox_messages::Entity::update_many().set(changes);
        if bump_retry {
            update = update.col_expr(
                outbox_messages::Column::RetryCount,
                Expr::col(outbox_messages::Column::RetryCount).add(1),
            );
        }
        let result = update
            .filter(outbox_messages::Column::Id.eq(id.as_uuid()))
            .filter(outbox_messages::Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await
            .context("transition outbox message")?;
        Ok(result.rows_affected == 1)
    }

    /// Sequences of an aggregate that are still PENDING or PROCESSING, ascending.
    async fn unfinished_sequences(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<i64>, CoordinatorError> {
        let sequences: Vec<i64> = outbox_messages::Entity::find()
            .select_only()
            .column(outbox_messages::Column::Sequence)
            .filter(outbox_messages::Column::AggregateType.eq(aggregate_type))
            .filter(outbox_messages::Column::AggregateId.eq(aggregate_id))
            .filter(outbox_messages::Column::Status.is_in(status_in(&UNFINISHED)))
            .order_by_asc(outbox_messages::Column::Sequence)
            .into_tuple()
            .all(&self.db)
            .await
            .context("read unfinished outbox sequences")?;
        Ok(sequences)
    }

    async fn count_where(
        &self,
        filter: sea_orm::Condition,
    ) -> Result<u64, CoordinatorError> {
        let count = outbox_messages::Entity::find()
            .filter(filter)
            .count(&self.db)
            .await
            .context("count outbox messages")?;
        Ok(count)
    }

    /// Oldest `created_at` and mean age of PENDING rows, both computed in SQL.
    async fn pending_ages(&self, now: DateTime<Utc>) -> Result<PendingAgeRow, CoordinatorError> {
        let backend = self.db.get_database_backend();
        let sql = match backend {
            DbBackend::Postgres => {
                "SELECT MIN(created_at) AS oldest, \
                 CAST(EXTRACT(EPOCH FROM AVG($1 - created_at)) AS DOUBLE PRECISION) AS avg_age_secs \
                 FROM outbox_messages WHERE status = $2"
            }
            DbBackend::Sqlite => {
                "SELECT MIN(created_at) AS oldest, \
                 AVG((julianday(?) - julianday(created_at)) * 86400.0) AS avg_age_secs \
                 FROM outbox_messages WHERE status = ?"
            }
            DbBackend::MySql => {
                "SELECT MIN(created_at) AS oldest, \
                 CAST(AVG(TIMESTAMPDIFF(MICROSECOND, created_at, ?)) / 1000000.0 AS DOUBLE) \
                 AS avg_age_secs \
                 FROM outbox_messages WHERE status = ?"
            }
        };
        let row = PendingAgeRow::find_by_statement(Statement::from_sql_and_values(
            backend,
            sql,
            [now.into(), OutboxStatus::Pending.as_str().into()],
        ))
        .one(&self.db)
        .await
        .context("read pending outbox ages")?;
        Ok(row.unwrap_or_default())
    }

    async fn grouped_counts(
        &self,
        column: outbox_messages::Column,
    ) -> Result<BTreeMap<String, BTreeMap<OutboxStatus, u64>>, CoordinatorError> {
        let rows: Vec<(String, String, i64)> = outbox_messages::Entity::find()
            .select_only()
            .column(column)
            .column(outbox_messages::Column::Status)
            .column_as(Expr::col(outbox_messages::Column::Id).count(), "count")
            .group_by(column)
            .group_by(outbox_messages::Column::Status)
            .into_tuple()
            .all(&self.db)
            .await
            .context("group outbox messages")?;
        let mut out: BTreeMap<String, BTreeMap<OutboxStatus, u64>> = BTreeMap::new();
        for (name, status, count) in rows {
            let status = status
                .parse::<OutboxStatus>()
                .map_err(|e| CoordinatorError::Internal(e.into()))?;
            out.entry(name).or_default().insert(status, count.max(0) as u64);
        }
        Ok(out)
    }
}

impl OutboxRepository for DbOutboxRepository {
    async fn reclaim_stuck(&self, started_before: DateTime<Utc>) -> Result<u64, CoordinatorError> {
        let result = outbox_messages::Entity::update_many()
            .set(outbox_messages::ActiveModel {
                status: Set(OutboxStatus::Pending.as_str().to_owned()),
                processing_started_at: Set(None),
                ..Default::default()
            })
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Processing.as_str()))
            .filter(outbox_messages::Column::ProcessingStartedAt.lt(started_before))
            .exec(&self.db)
            .await
            .context("reclaim stuck outbox messages")?;
        Ok(result.rows_affected)
    }

    async fn claim_batch(
        &self,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, CoordinatorError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = outbox_messages::Entity::find()
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Pending.as_str()))
            .filter(outbox_messages::Column::NextAttemptAt.lte(now))
            .order_by_asc(outbox_messages::Column::AggregateType)
            .order_by_asc(outbox_messages::Column::AggregateId)
            .order_by_asc(outbox_messages::Column::Sequence)
            .limit(limit)
            .all(&self.db)
            .await
            .context("select outbox claim candidates")?;

        // Group candidate sequences per aggregate, keeping the ordered rows.
        let mut per_aggregate: BTreeMap<(String, String), Vec<outbox_messages::Model>> =
            BTreeMap::new();
        for model in candidates {
            per_aggregate
                .entry((model.aggregate_type.clone(), model.aggregate_id.clone()))
                .or_default()
                .push(model);
        }

        let mut claimed = Vec::new();
        for ((aggregate_type, aggregate_id), rows) in per_aggregate {
            let in_batch: BTreeSet<i64> = rows.iter().map(|r| r.sequence).collect();
            // Claimable prefix: unfinished sequences up to the first one not in this batch.
            let claimable: BTreeSet<i64> = self
                .unfinished_sequences(&aggregate_type, &aggregate_id)
                .await?
                .into_iter()
                .take_while(|seq| in_batch.contains(seq))
                .collect();

            for row in rows {
                if !claimable.contains(&row.sequence) {
                    break;
                }
                let won = self
                    .transition(
                        MessageId(row.id),
                        OutboxStatus::Pending,
                        outbox_messages::ActiveModel {
                            status: Set(OutboxStatus::Processing.as_str().to_owned()),
                            processing_started_at: Set(Some(now)),
                            ..Default::default()
                        },
                        false,
                    )
                    .await?;
                if !won {
                    // Another relay took this row; the rest of the aggregate is theirs.
                    break;
                }
                let mut message = message_from_model(row)?;
                message.status = OutboxStatus::Processing;
                message.processing_started_at = Some(now);
                claimed.push(message);
            }
        }
        Ok(claimed)
    }

    async fn mark_published(
        &self,
        id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        self.transition(
            id,
            OutboxStatus::Processing,
            outbox_messages::ActiveModel {
                status: Set(OutboxStatus::Published.as_str().to_owned()),
                published_at: Set(Some(now)),
                last_error: Set(None),
                ..Default::default()
            },
            false,
        )
        .await
    }

    async fn schedule_retry(
        &self,
        id: MessageId,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, CoordinatorError> {
        self.transition(
            id,
            OutboxStatus::Processing,
            outbox_messages::ActiveModel {
                status: Set(OutboxStatus::Pending.as_str().to_owned()),
                processing_started_at: Set(None),
                next_attempt_at: Set(next_attempt_at),
                last_error: Set(Some(error.to_owned())),
                ..Default::default()
            },
            true,
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: MessageId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        self.transition(
            id,
            OutboxStatus::Processing,
            outbox_messages::ActiveModel {
                status: Set(OutboxStatus::Failed.as_str().to_owned()),
                failed_at: Set(Some(now)),
                last_error: Set(Some(error.to_owned())),
                ..Default::default()
            },
            true,
        )
        .await
    }

    async fn release(&self, id: MessageId) -> Result<bool, CoordinatorError> {
        self.transition(
            id,
            OutboxStatus::Processing,
            outbox_messages::ActiveModel {
                status: Set(OutboxStatus::Pending.as_str().to_owned()),
                processing_started_at: Set(None),
                ..Default::default()
            },
            false,
        )
        .await
    }

    async fn archive_published(
        &self,
        limit: u64,
        published_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError> {
        if limit == 0 {
            return Ok(0);
        }
        let txn = self.db.begin().await.context("begin archive batch")?;
        let rows = outbox_messages::Entity::find()
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Published.as_str()))
            .filter(outbox_messages::Column::PublishedAt.lt(published_before))
            .order_by_asc(outbox_messages::Column::PublishedAt)
            .limit(limit)
            .lock_exclusive()
            .all(&txn)
            .await
            .context("select published outbox messages")?;
        if rows.is_empty() {
            txn.commit().await.context("commit empty archive batch")?;
            return Ok(0);
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let archived = rows.into_iter().map(|r| outbox_archive::ActiveModel {
            id: Set(r.id),
            event_type: Set(r.event_type),
            aggregate_type: Set(r.aggregate_type),
            aggregate_id: Set(r.aggregate_id),
            sequence: Set(r.sequence),
            payload: Set(r.payload),
            headers: Set(r.headers),
            status: Set(r.status),
            retry_count: Set(r.retry_count),
            max_retries: Set(r.max_retries),
            created_at: Set(r.created_at),
            published_at: Set(r.published_at),
            archived_at: Set(now),
        });
        outbox_archive::Entity::insert_many(archived)
            .on_conflict(
                OnConflict::column(outbox_archive::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await
            .context("copy outbox messages to archive")?;

        let deleted = outbox_messages::Entity::delete_many()
            .filter(outbox_messages::Column::Id.is_in(ids))
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Published.as_str()))
            .exec(&txn)
            .await
            .context("delete archived outbox messages")?;
        txn.commit().await.context("commit archive batch")?;
        Ok(deleted.rows_affected)
    }

    async fn prune_archive(
        &self,
        limit: u64,
        archived_before: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError> {
        if limit == 0 {
            return Ok(0);
        }
        let ids: Vec<Uuid> = outbox_archive::Entity::find()
            .select_only()
            .column(outbox_archive::Column::Id)
            .filter(outbox_archive::Column::ArchivedAt.lt(archived_before))
            .order_by_asc(outbox_archive::Column::ArchivedAt)
            .limit(limit)
            .into_tuple()
            .all(&self.db)
            .await
            .context("select expired archive rows")?;
        if ids.is_empty() {
            return Ok(0);
        }
        let result = outbox_archive::Entity::delete_many()
            .filter(outbox_archive::Column::Id.is_in(ids))
            .filter(outbox_archive::Column::ArchivedAt.lt(archived_before))
            .exec(&self.db)
            .await
            .context("prune outbox archive")?;
        Ok(result.rows_affected)
    }

    async fn prune_dead_letters(
        &self,
        limit: u64,
        failed_before: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError> {
        if limit == 0 {
            return Ok(0);
        }
        let ids: Vec<Uuid> = outbox_messages::Entity::find()
            .select_only()
            .column(outbox_messages::Column::Id)
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Failed.as_str()))
            .filter(outbox_messages::Column::FailedAt.lt(failed_before))
            .order_by_asc(outbox_messages::Column::FailedAt)
            .limit(limit)
            .into_tuple()
            .all(&self.db)
            .await
            .context("select expired dead letters")?;
        if ids.is_empty() {
            return Ok(0);
        }
        let result = outbox_messages::Entity::delete_many()
            .filter(outbox_messages::Column::Id.is_in(ids))
            .filter(outbox_messages::Column::Status.eq(OutboxStatus::Failed.as_str()))
            .filter(outbox_messages::Column::FailedAt.lt(failed_before))
            .exec(&self.db)
            .await
            .context("prune dead letters")?;
        Ok(result.rows_affected)
    }

    async fn snapshot(&self, cutoffs: SnapshotCutoffs) -> Result<OutboxSnapshot, CoordinatorError> {
        let status_rows: Vec<(String, i64)> = outbox_messages::Entity::find()
            .select_only()
            .column(outbox_messages::Column::Status)
            .column_as(Expr::col(outbox_messages::Column::Id).count(), "count")
            .group_by(outbox_messages::Column::Status)
            .into_tuple()
            .all(&self.db)
            .await
            .context("count outbox messages by status")?;
        let mut by_status: BTreeMap<OutboxStatus, u64> =
            OutboxStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in status_rows {
            let status = status
                .parse::<OutboxStatus>()
                .map_err(|e| CoordinatorError::Internal(e.into()))?;
            by_status.insert(status, count.max(0) as u64);
        }

        let ages = self.pending_ages(cutoffs.now).await?;
        let pending_age_max_secs = ages
            .oldest
            .map(|oldest| (cutoffs.now - oldest).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        let pending_age_avg_secs = ages.avg_age_secs.unwrap_or(0.0).max(0.0);

        let retryable_pending = self
            .count_where(
                sea_orm::Condition::all()
                    .add(outbox_messages::Column::Status.eq(OutboxStatus::Pending.as_str()))
                    .add(outbox_messages::Column::RetryCount.gt(0)),
            )
            .await?;
        let stuck_processing = self
            .count_where(
                sea_orm::Condition::all()
                    .add(outbox_messages::Column::Status.eq(OutboxStatus::Processing.as_str()))
                    .add(outbox_messages::Column::ProcessingStartedAt.lt(cutoffs.stuck_before)),
            )
            .await?;
        let published_in_window = self
            .count_where(
                sea_orm::Condition::all()
                    .add(outbox_messages::Column::Status.eq(OutboxStatus::Published.as_str()))
                    .add(outbox_messages::Column::PublishedAt.gte(cutoffs.published_since)),
            )
            .await?;
        let dead_lettered_in_window = self
            .count_where(
                sea_orm::Condition::all()
                    .add(outbox_messages::Column::Status.eq(OutboxStatus::Failed.as_str()))
                    .add(outbox_messages::Column::FailedAt.gte(cutoffs.failed_since)),
            )
            .await?;

        Ok(OutboxSnapshot {
            by_status,
            pending_age_avg_secs,
            pending_age_max_secs,
            retryable_pending,
            stuck_processing,
            published_in_window,
            dead_lettered_in_window,
            by_event_type: self
                .grouped_counts(outbox_messages::Column::EventType)
                .await?,
            by_aggregate_type: self
                .grouped_counts(outbox_messages::Column::AggregateType)
                .await?,
        })
    }
}

// ── Assignments ───────────────────────────────────────────────────────────────

fn assignment_from_model(model: assignments::Model) -> Assignment {
    Assignment {
        id: AssignmentId(model.id),
        person_id: PersonId(model.person_id),
        week_start: model.week_start,
        rotation: model.rotation,
        notes: model.notes,
        version: model.version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

pub async fn insert_assignment<C: ConnectionTrait>(
    conn: &C,
    assignment: &Assignment,
) -> Result<(), CoordinatorError> {
    assignments::ActiveModel {
        id: Set(assignment.id.into()),
        person_id: Set(assignment.person_id.into()),
        week_start: Set(assignment.week_start),
        rotation: Set(assignment.rotation.clone()),
        notes: Set(assignment.notes.clone()),
        version: Set(assignment.version),
        created_at: Set(assignment.created_at),
        updated_at: Set(assignment.updated_at),
    }
    .insert(conn)
    .await?;
    Ok(())
}

pub async fn find_assignment<C: ConnectionTrait>(
    conn: &C,
    id: AssignmentId,
) -> Result<Option<Assignment>, CoordinatorError> {
    let model = assignments::Entity::find_by_id(id.as_uuid())
        .one(conn)
        .await?;
    Ok(model.map(assignment_from_model))
}

/// `SELECT … FOR UPDATE` of one person's assignment for one week.
pub async fn lock_assignment_slot(
    txn: &DatabaseTransaction,
    person: PersonId,
    week: NaiveDate,
) -> Result<Option<Assignment>, CoordinatorError> {
    let model = assignments::Entity::find()
        .filter(assignments::Column::PersonId.eq(person.as_uuid()))
        .filter(assignments::Column::WeekStart.eq(week))
        .lock_exclusive()
        .one(txn)
        .await?;
    Ok(model.map(assignment_from_model))
}

pub async fn lock_assignment(
    txn: &DatabaseTransaction,
    id: AssignmentId,
) -> Result<Option<Assignment>, CoordinatorError> {
    let model = assignments::Entity::find_by_id(id.as_uuid())
        .lock_exclusive()
        .one(txn)
        .await?;
    Ok(model.map(assignment_from_model))
}

/// Write `person_id` with a version check and bump. Returns the updated row.
pub async fn reassign(
    txn: &DatabaseTransaction,
    assignment: &Assignment,
    to: PersonId,
    now: DateTime<Utc>,
) -> Result<Assignment, CoordinatorError> {
    let result = assignments::Entity::update_many()
        .set(assignments::ActiveModel {
            person_id: Set(to.into()),
            version: Set(assignment.version + 1),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(assignments::Column::Id.eq(assignment.id.as_uuid()))
        .filter(assignments::Column::Version.eq(assignment.version))
        .exec(txn)
        .await?;
    if result.rows_affected != 1 {
        return Err(version_conflict(txn, assignment.id, assignment.version).await);
    }
    Ok(Assignment {
        person_id: to,
        version: assignment.version + 1,
        updated_at: now,
        ..assignment.clone()
    })
}

/// Write editable fields only if the stored version still equals `expected`.
/// Returns the number of rows written (0 or 1).
pub async fn update_assignment_if_version(
    txn: &DatabaseTransaction,
    id: AssignmentId,
    expected: i64,
    rotation: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64, CoordinatorError> {
    let result = assignments::Entity::update_many()
        .set(assignments::ActiveModel {
            rotation: Set(rotation.to_owned()),
            notes: Set(notes.map(str::to_owned)),
            version: Set(expected + 1),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(assignments::Column::Id.eq(id.as_uuid()))
        .filter(assignments::Column::Version.eq(expected))
        .exec(txn)
        .await?;
    Ok(result.rows_affected)
}

/// Build the conflict error, reading the version that won (or -1 if the row vanished).
pub async fn version_conflict<C: ConnectionTrait>(
    conn: &C,
    id: AssignmentId,
    expected: i64,
) -> CoordinatorError {
    let actual = match find_assignment(conn, id).await {
        Ok(Some(current)) => current.version,
        Ok(None) => -1,
        Err(err) => return err,
    };
    CoordinatorError::OptimisticConflict {
        entity: "assignment",
        id: id.as_uuid(),
        expected,
        actual,
    }
}

// ── Swap records ──────────────────────────────────────────────────────────────

fn swap_from_model(model: swap_records::Model) -> Result<SwapRecord, CoordinatorError> {
    Ok(SwapRecord {
        id: SwapId(model.id),
        operation_id: model.operation_id,
        swap_type: model
            .swap_type
            .parse()
            .map_err(|e: rotation_domain::ParseEnumError| CoordinatorError::Internal(e.into()))?,
        status: model
            .status
            .parse()
            .map_err(|e: rotation_domain::ParseEnumError| CoordinatorError::Internal(e.into()))?,
        source_person_id: PersonId(model.source_person_id),
        source_week: model.source_week,
        target_person_id: PersonId(model.target_person_id),
        target_week: model.target_week,
        source_assignment_id: AssignmentId(model.source_assignment_id),
        target_assignment_id: model.target_assignment_id.map(AssignmentId),
        requested_by: PersonId(model.requested_by),
        reason: model.reason,
        executed_at: model.executed_at,
        rolled_back_at: model.rolled_back_at,
        rolled_back_by: model.rolled_back_by.map(PersonId),
        rollback_reason: model.rollback_reason,
    })
}

pub async fn insert_swap_record(
    txn: &DatabaseTransaction,
    record: &SwapRecord,
) -> Result<(), CoordinatorError> {
    swap_records::ActiveModel {
        id: Set(record.id.into()),
        operation_id: Set(record.operation_id.clone()),
        swap_type: Set(record.swap_type.as_str().to_owned()),
        status: Set(record.status.as_str().to_owned()),
        source_person_id: Set(record.source_person_id.into()),
        source_week: Set(record.source_week),
        target_person_id: Set(record.target_person_id.into()),
        target_week: Set(record.target_week),
        source_assignment_id: Set(record.source_assignment_id.into()),
        target_assignment_id: Set(record.target_assignment_id.map(Into::into)),
        requested_by: Set(record.requested_by.into()),
        reason: Set(record.reason.clone()),
        executed_at: Set(record.executed_at),
        rolled_back_at: Set(record.rolled_back_at),
        rolled_back_by: Set(record.rolled_back_by.map(Into::into)),
        rollback_reason: Set(record.rollback_reason.clone()),
    }
    .insert(txn)
    .await?;
    Ok(())
}

pub async fn find_swap_record<C: ConnectionTrait>(
    conn: &C,
    id: SwapId,
) -> Result<Option<SwapRecord>, CoordinatorError> {
    swap_records::Entity::find_by_id(id.as_uuid())
        .one(conn)
        .await?
        .map(swap_from_model)
        .transpose()
}

/// The swap currently in effect for `operation_id`, if any.
pub async fn find_swap_by_operation<C: ConnectionTrait>(
    conn: &C,
    operation_id: &str,
) -> Result<Option<SwapRecord>, CoordinatorError> {
    swap_records::Entity::find()
        .filter(swap_records::Column::OperationId.eq(operation_id))
        .filter(swap_records::Column::Status.eq(SwapStatus::Executed.as_str()))
        .one(conn)
        .await?
        .map(swap_from_model)
        .transpose()
}

/// EXECUTED → ROLLED_BACK. Returns `false` if the swap was no longer EXECUTED.
pub async fn mark_swap_rolled_back(
    txn: &DatabaseTransaction,
    id: SwapId,
    by: PersonId,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, CoordinatorError> {
    let result = swap_records::Entity::update_many()
        .set(swap_records::ActiveModel {
            status: Set(SwapStatus::RolledBack.as_str().to_owned()),
            rolled_back_at: Set(Some(now)),
            rolled_back_by: Set(Some(by.into())),
            rollback_reason: Set(reason.map(str::to_owned)),
            ..Default::default()
        })
        .filter(swap_records::Column::Id.eq(id.as_uuid()))
        .filter(swap_records::Column::Status.eq(SwapStatus::Executed.as_str()))
        .exec(txn)
        .await?;
    Ok(result.rows_affected == 1)
}
