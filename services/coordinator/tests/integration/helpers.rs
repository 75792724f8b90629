use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde_json::json;

use rotation_coordinator::domain::repository::EventPublisher;
use rotation_coordinator::domain::types::{Assignment, NewOutboxMessage, OutboxMessage};
use rotation_coordinator::error::PublishError;
use rotation_coordinator::infra::db::{self, DbOutboxRepository};
use rotation_coordinator::infra::memory::{InMemoryLedger, InMemoryLock};
use rotation_coordinator::infra::tx::TransactionScope;
use rotation_coordinator::usecase::assignment::OptimisticVersionGuard;
use rotation_coordinator::usecase::swap::{SwapExecutor, SwapSettings};
use rotation_coordinator::worker::relay::{OutboxRelay, RelaySettings};
use rotation_coordinator_migration::{Migrator, MigratorTrait};
use rotation_coordinator_schema::{outbox_archive, outbox_messages, swap_records};
use rotation_core::retry::RetryPolicy;
use rotation_domain::id::{AssignmentId, MessageId, PersonId, SwapId};

// ── Database ─────────────────────────────────────────────────────────────────

/// Fresh migrated in-memory SQLite database. One connection, so every test
/// sees the same memory database.
pub async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub fn week(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap() + chrono::Duration::weeks(i64::from(offset))
}

pub async fn seed_assignment(
    db: &DatabaseConnection,
    person: PersonId,
    week_start: NaiveDate,
    rotation: &str,
) -> Assignment {
    let now = Utc::now();
    let assignment = Assignment {
        id: AssignmentId::new(),
        person_id: person,
        week_start,
        rotation: rotation.to_owned(),
        notes: None,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    db::insert_assignment(db, &assignment).await.unwrap();
    assignment
}

pub async fn load_assignment(db: &DatabaseConnection, id: AssignmentId) -> Assignment {
    db::find_assignment(db, id).await.unwrap().unwrap()
}

/// Commit one test event for `aggregate_id`.
pub async fn enqueue_event(
    db: &DatabaseConnection,
    aggregate_id: &str,
    max_retries: i32,
) -> OutboxMessage {
    let message = NewOutboxMessage::new("test.event", "test", aggregate_id, json!({ "n": 1 }))
        .with_max_retries(max_retries);
    TransactionScope::new(db.clone())
        .run(move |txn| Box::pin(async move { db::enqueue(txn, &message).await }))
        .await
        .unwrap()
}

pub async fn outbox_rows(db: &DatabaseConnection) -> Vec<outbox_messages::Model> {
    outbox_messages::Entity::find()
        .order_by_asc(outbox_messages::Column::AggregateId)
        .order_by_asc(outbox_messages::Column::Sequence)
        .all(db)
        .await
        .unwrap()
}

pub async fn outbox_row(db: &DatabaseConnection, id: MessageId) -> outbox_messages::Model {
    outbox_messages::Entity::find_by_id(id.as_uuid())
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

pub async fn outbox_events_for(
    db: &DatabaseConnection,
    aggregate_id: &str,
) -> Vec<outbox_messages::Model> {
    outbox_messages::Entity::find()
        .filter(outbox_messages::Column::AggregateId.eq(aggregate_id))
        .order_by_asc(outbox_messages::Column::Sequence)
        .all(db)
        .await
        .unwrap()
}

pub async fn archive_rows(db: &DatabaseConnection) -> Vec<outbox_archive::Model> {
    outbox_archive::Entity::find().all(db).await.unwrap()
}

pub async fn swap_record_count(db: &DatabaseConnection) -> usize {
    swap_records::Entity::find().all(db).await.unwrap().len()
}

// ── Backdating ───────────────────────────────────────────────────────────────

pub async fn backdate_outbox(
    db: &DatabaseConnection,
    id: MessageId,
    changes: outbox_messages::ActiveModel,
) {
    outbox_messages::Entity::update_many()
        .set(changes)
        .filter(outbox_messages::Column::Id.eq(id.as_uuid()))
        .exec(db)
        .await
        .unwrap();
}

pub async fn set_published_at(db: &DatabaseConnection, id: MessageId, at: DateTime<Utc>) {
    backdate_outbox(
        db,
        id,
        outbox_messages::ActiveModel {
            published_at: Set(Some(at)),
            ..Default::default()
        },
    )
    .await;
}

pub async fn set_failed_at(db: &DatabaseConnection, id: MessageId, at: DateTime<Utc>) {
    backdate_outbox(
        db,
        id,
        outbox_messages::ActiveModel {
            failed_at: Set(Some(at)),
            ..Default::default()
        },
    )
    .await;
}

pub async fn set_archived_at(db: &DatabaseConnection, id: MessageId, at: DateTime<Utc>) {
    outbox_archive::Entity::update_many()
        .set(outbox_archive::ActiveModel {
            archived_at: Set(at),
            ..Default::default()
        })
        .filter(outbox_archive::Column::Id.eq(id.as_uuid()))
        .exec(db)
        .await
        .unwrap();
}

pub async fn set_executed_at(db: &DatabaseConnection, id: SwapId, at: DateTime<Utc>) {
    swap_records::Entity::update_many()
        .set(swap_records::ActiveModel {
            executed_at: Set(at),
            ..Default::default()
        })
        .filter(swap_records::Column::Id.eq(id.as_uuid()))
        .exec(db)
        .await
        .unwrap();
}

// ── RecordingPublisher ───────────────────────────────────────────────────────

/// Publisher double that records deliveries and fails on demand.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub delivered: Arc<Mutex<Vec<OutboxMessage>>>,
    attempts: Arc<Mutex<u32>>,
    fail_next: Arc<Mutex<VecDeque<PublishError>>>,
    failing_aggregates: Arc<Mutex<HashMap<String, PublishError>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next publish call fails with `err`, whatever the message.
    pub fn fail_next(&self, err: PublishError) {
        self.fail_next.lock().unwrap().push_back(err);
    }

    /// Every publish for `aggregate_id` fails with `err` until healed.
    pub fn fail_aggregate(&self, aggregate_id: &str, err: PublishError) {
        self.failing_aggregates
            .lock()
            .unwrap()
            .insert(aggregate_id.to_owned(), err);
    }

    pub fn heal_aggregate(&self, aggregate_id: &str) {
        self.failing_aggregates.lock().unwrap().remove(aggregate_id);
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    /// `(aggregate_id, sequence)` in delivery order.
    pub fn delivered_keys(&self) -> Vec<(String, i64)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|m| (m.aggregate_id.clone(), m.sequence))
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(err) = self.fail_next.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self
            .failing_aggregates
            .lock()
            .unwrap()
            .get(&message.aggregate_id)
        {
            return Err(err.clone());
        }
        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ── Component builders ───────────────────────────────────────────────────────

/// Relay whose retries are immediately due again.
pub fn test_relay(
    db: &DatabaseConnection,
    publisher: RecordingPublisher,
) -> OutboxRelay<DbOutboxRepository, RecordingPublisher> {
    OutboxRelay {
        repo: DbOutboxRepository { db: db.clone() },
        publisher,
        settings: RelaySettings {
            backoff: RetryPolicy::new(u32::MAX, Duration::ZERO),
            ..RelaySettings::default()
        },
    }
}

pub fn test_executor(db: &DatabaseConnection) -> SwapExecutor<InMemoryLock, InMemoryLedger> {
    SwapExecutor {
        scope: TransactionScope::new(db.clone()),
        locks: InMemoryLock::new(),
        ledger: InMemoryLedger::new(),
        settings: SwapSettings {
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..SwapSettings::default()
        },
    }
}

pub fn test_guard(db: &DatabaseConnection) -> OptimisticVersionGuard {
    OptimisticVersionGuard {
        scope: TransactionScope::new(db.clone()),
    }
}
