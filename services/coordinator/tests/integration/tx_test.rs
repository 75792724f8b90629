use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;

use rotation_coordinator::domain::types::Assignment;
use rotation_coordinator::error::CoordinatorError;
use rotation_coordinator::infra::db;
use rotation_coordinator::infra::tx::TransactionScope;
use rotation_core::retry::RetryPolicy;
use rotation_domain::id::{AssignmentId, PersonId};

use crate::helpers::{test_db, week};

fn draft(rotation: &str) -> Assignment {
    let now = Utc::now();
    Assignment {
        id: AssignmentId::new(),
        person_id: PersonId::new(),
        week_start: week(0),
        rotation: rotation.to_owned(),
        notes: None,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn should_commit_when_body_succeeds() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let row = draft("ICU");
    let id = row.id;

    scope
        .run(move |txn| Box::pin(async move { db::insert_assignment(txn, &row).await }))
        .await
        .unwrap();

    assert!(db::find_assignment(&db, id).await.unwrap().is_some());
}

#[tokio::test]
async fn should_roll_back_every_write_when_body_fails() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let row = draft("ICU");
    let id = row.id;

    let result: Result<(), CoordinatorError> = scope
        .run(move |txn| {
            Box::pin(async move {
                db::insert_assignment(txn, &row).await?;
                Err(CoordinatorError::Validation("abort".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(CoordinatorError::Validation(_))));
    assert!(db::find_assignment(&db, id).await.unwrap().is_none());
}

#[tokio::test]
async fn should_undo_only_the_nested_scope_on_failure() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let outer = draft("ICU");
    let inner = draft("Clinic");
    let (outer_id, inner_id) = (outer.id, inner.id);

    scope
        .run(move |txn| {
            Box::pin(async move {
                db::insert_assignment(txn, &outer).await?;
                let nested: Result<(), CoordinatorError> =
                    TransactionScope::run_nested(txn, move |savepoint| {
                        Box::pin(async move {
                            db::insert_assignment(savepoint, &inner).await?;
                            Err(CoordinatorError::Validation("nested abort".into()))
                        })
                    })
                    .await;
                assert!(nested.is_err());
                Ok(())
            })
        })
        .await
        .unwrap();

    assert!(db::find_assignment(&db, outer_id).await.unwrap().is_some());
    assert!(db::find_assignment(&db, inner_id).await.unwrap().is_none());
}

#[tokio::test]
async fn should_retry_transient_failures_until_success() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(3, Duration::ZERO);

    let value = scope
        .run_with_retry(&policy, |_txn| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CoordinatorError::Transient("could not serialize access".into()))
                } else {
                    Ok(42)
                }
            })
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn should_give_up_after_max_attempts() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(3, Duration::ZERO);

    let result: Result<(), CoordinatorError> = scope
        .run_with_retry(&policy, |_txn| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoordinatorError::Transient("deadlock detected".into()))
            })
        })
        .await;

    match result {
        Err(CoordinatorError::RetryExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("deadlock detected"));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn should_not_retry_permanent_failures() {
    let db = test_db().await;
    let scope = TransactionScope::new(db.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(5, Duration::ZERO);

    let result: Result<(), CoordinatorError> = scope
        .run_with_retry(&policy, |_txn| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoordinatorError::Validation("bad input".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(CoordinatorError::Validation(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
