use chrono::Utc;
use sea_orm::DatabaseTransaction;
use serde_json::json;
use tracing::{debug, info};

use rotation_domain::id::AssignmentId;

use crate::domain::types::{Assignment, AssignmentEdit, NewOutboxMessage, events};
use crate::error::CoordinatorError;
use crate::infra::db;
use crate::infra::tx::TransactionScope;

/// Lock-free single-row edits checked against the caller's version.
///
/// Conflicts are reported, never retried: the caller re-reads and decides.
#[derive(Clone)]
pub struct OptimisticVersionGuard {
    pub scope: TransactionScope,
}

impl OptimisticVersionGuard {
    pub async fn update<M>(
        &self,
        id: AssignmentId,
        supplied_version: i64,
        mutator: M,
    ) -> Result<Assignment, CoordinatorError>
    where
        M: FnOnce(&Assignment) -> AssignmentEdit + Send,
    {
        let current = db::find_assignment(self.scope.connection(), id)
            .await?
            .ok_or_else(|| CoordinatorError::not_found("assignment", id))?;
        if current.version != supplied_version {
            debug!(%id, expected = supplied_version, actual = current.version, "stale version");
            return Err(CoordinatorError::OptimisticConflict {
                entity: "assignment",
                id: id.as_uuid(),
                expected: supplied_version,
                actual: current.version,
            });
        }

        let edit = mutator(&current);
        if edit.rotation.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "rotation must not be empty".to_owned(),
            ));
        }

        let updated = self
            .scope
            .run(|txn| {
                Box::pin(async move { write_versioned(txn, current, supplied_version, edit).await })
            })
            .await?;

        info!(%id, version = updated.version, "assignment updated");
        Ok(updated)
    }
}

async fn write_versioned(
    txn: &DatabaseTransaction,
    current: Assignment,
    expected: i64,
    edit: AssignmentEdit,
) -> Result<Assignment, CoordinatorError> {
    let now = Utc::now();
    let written = db::update_assignment_if_version(
        txn,
        current.id,
        expected,
        &edit.rotation,
        edit.notes.as_deref(),
        now,
    )
    .await?;
    if written != 1 {
        return Err(db::version_conflict(txn, current.id, expected).await);
    }

    let updated = Assignment {
        rotation: edit.rotation,
        notes: edit.notes,
        version: expected + 1,
        updated_at: now,
        ..current
    };
    let event = NewOutboxMessage::new(
        events::ASSIGNMENT_UPDATED,
        events::AGGREGATE_ASSIGNMENT,
        updated.id,
        json!({
            "assignment_id": updated.id,
            "person_id": updated.person_id,
            "week_start": updated.week_start,
            "rotation": updated.rotation,
            "notes": updated.notes,
            "previous_version": expected,
            "version": updated.version,
        }),
    );
    db::enqueue(txn, &event).await?;
    Ok(updated)
}
