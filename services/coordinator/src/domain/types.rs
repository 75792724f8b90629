use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rotation_domain::id::{AssignmentId, MessageId, PersonId, SwapId};
use rotation_domain::outbox::OutboxStatus;
use rotation_domain::swap::{SwapStatus, SwapType};

use crate::error::CoordinatorError;

/// Default publish attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Event and aggregate names written to the outbox.
pub mod events {
    pub const SWAP_EXECUTED: &str = "swap.executed";
    pub const SWAP_ROLLED_BACK: &str = "swap.rolled_back";
    pub const ASSIGNMENT_UPDATED: &str = "assignment.updated";

    pub const AGGREGATE_SWAP: &str = "swap";
    pub const AGGREGATE_ASSIGNMENT: &str = "assignment";
}

// ── Outbox ────────────────────────────────────────────────────────────────────

/// An event to be written in the same transaction as the mutation it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub headers: Map<String, Value>,
    pub max_retries: i32,
}

impl NewOutboxMessage {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl ToString,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.to_string(),
            payload,
            headers: Map::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub sequence: i64,
    pub payload: Value,
    pub headers: Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Whether one more failed attempt would exhaust the retry budget.
    pub fn exhausted_after_failure(&self) -> bool {
        self.retry_count + 1 >= self.max_retries
    }
}

/// Counters from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub reclaimed: u64,
    pub claimed: u64,
    pub published: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// Claimed but handed back untouched to keep per-aggregate order.
    pub released: u64,
}

/// Counters from one archiver maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub archived: u64,
    pub archive_pruned: u64,
    pub dead_letters_pruned: u64,
}

/// Raw queue figures read by the monitor in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboxSnapshot {
    pub by_status: BTreeMap<OutboxStatus, u64>,
    pub pending_age_avg_secs: f64,
    pub pending_age_max_secs: f64,
    /// PENDING rows that already failed at least once.
    pub retryable_pending: u64,
    pub stuck_processing: u64,
    /// PUBLISHED rows whose `published_at` falls inside the throughput window.
    pub published_in_window: u64,
    /// FAILED rows whose `failed_at` falls inside the growth window.
    pub dead_lettered_in_window: u64,
    pub by_event_type: BTreeMap<String, BTreeMap<OutboxStatus, u64>>,
    pub by_aggregate_type: BTreeMap<String, BTreeMap<OutboxStatus, u64>>,
}

/// Time boundaries for one monitor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotCutoffs {
    pub now: DateTime<Utc>,
    pub stuck_before: DateTime<Utc>,
    pub published_since: DateTime<Utc>,
    pub failed_since: DateTime<Utc>,
}

impl OutboxSnapshot {
    pub fn count(&self, status: OutboxStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

// ── Locks ─────────────────────────────────────────────────────────────────────

/// Random holder token proving lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(pub String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Single attempt.
    NonBlocking,
    /// Poll with backoff until `timeout` elapses.
    Blocking { timeout: Duration },
}

// ── Assignments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub person_id: PersonId,
    pub week_start: NaiveDate,
    pub rotation: String,
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a version-guarded edit may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentEdit {
    pub rotation: String,
    pub notes: Option<String>,
}

// ── Swaps ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SwapRequest {
    pub swap_type: SwapType,
    pub source_person_id: PersonId,
    pub source_week: NaiveDate,
    pub target_person_id: PersonId,
    /// Required for one-to-one, absent for absorb.
    pub target_week: Option<NaiveDate>,
    pub requested_by: PersonId,
    pub reason: Option<String>,
}

impl SwapRequest {
    /// Shape checks that need no storage access.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.source_person_id == self.target_person_id {
            return Err(CoordinatorError::Validation(
                "cannot swap a slot with itself".to_owned(),
            ));
        }
        match (self.swap_type, self.target_week) {
            (SwapType::OneToOne, None) => Err(CoordinatorError::Validation(
                "one-to-one swap requires target_week".to_owned(),
            )),
            (SwapType::Absorb, Some(_)) => Err(CoordinatorError::Validation(
                "absorb swap must not set target_week".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Stable identity of the logical operation. `requested_by` and `reason`
    /// are not part of it.
    pub fn operation_id(&self) -> String {
        let target_week = self
            .target_week
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_owned());
        format!(
            "swap:{}:{}:{}:{}:{}",
            self.swap_type, self.source_person_id, self.source_week, self.target_person_id,
            target_week
        )
    }

    /// Every `(person, week)` slot this swap reads or writes, sorted and deduplicated.
    pub fn slot_keys(&self) -> Vec<String> {
        slot_keys(
            self.source_person_id,
            self.target_person_id,
            self.source_week,
            self.target_week,
        )
    }
}

/// Lock keys for the slots a swap touches: both people in the source week
/// and, for a two-week swap, both people in the target week.
pub fn slot_keys(
    source: PersonId,
    target: PersonId,
    source_week: NaiveDate,
    target_week: Option<NaiveDate>,
) -> Vec<String> {
    let mut slots = vec![(source, source_week), (target, source_week)];
    if let Some(target_week) = target_week {
        slots.push((target, target_week));
        slots.push((source, target_week));
    }
    let mut keys: Vec<String> = slots
        .into_iter()
        .map(|(person, week)| slot_lock_key(person, week))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

pub fn slot_lock_key(person: PersonId, week: NaiveDate) -> String {
    format!("swap:slot:{person}:{week}")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RollbackRequest {
    pub rolled_back_by: PersonId,
    pub reason: Option<String>,
}

pub fn rollback_operation_id(swap_id: SwapId) -> String {
    format!("swap-rollback:{swap_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapRecord {
    pub id: SwapId,
    pub operation_id: String,
    pub swap_type: SwapType,
    pub status: SwapStatus,
    pub source_person_id: PersonId,
    pub source_week: NaiveDate,
    pub target_person_id: PersonId,
    pub target_week: Option<NaiveDate>,
    pub source_assignment_id: AssignmentId,
    pub target_assignment_id: Option<AssignmentId>,
    pub requested_by: PersonId,
    pub reason: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub rolled_back_by: Option<PersonId>,
    pub rollback_reason: Option<String>,
}

impl SwapRecord {
    /// The same slots the original execution locked.
    pub fn slot_keys(&self) -> Vec<String> {
        slot_keys(
            self.source_person_id,
            self.target_person_id,
            self.source_week,
            self.target_week,
        )
    }
}

/// Result handed back to the caller and cached in the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub swap_id: SwapId,
    pub swap_type: SwapType,
    pub status: SwapStatus,
    pub source_assignment_id: AssignmentId,
    pub target_assignment_id: Option<AssignmentId>,
    pub executed_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl From<&SwapRecord> for SwapOutcome {
    fn from(record: &SwapRecord) -> Self {
        Self {
            swap_id: record.id,
            swap_type: record.swap_type,
            status: record.status,
            source_assignment_id: record.source_assignment_id,
            target_assignment_id: record.target_assignment_id,
            executed_at: record.executed_at,
            rolled_back_at: record.rolled_back_at,
        }
    }
}
