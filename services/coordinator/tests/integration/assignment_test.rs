use rotation_coordinator::domain::types::{AssignmentEdit, events};
use rotation_coordinator::error::CoordinatorError;
use rotation_domain::id::{AssignmentId, PersonId};

use crate::helpers::{load_assignment, outbox_events_for, seed_assignment, test_db, test_guard, week};

fn edit(rotation: &str, notes: Option<&str>) -> AssignmentEdit {
    AssignmentEdit {
        rotation: rotation.to_owned(),
        notes: notes.map(str::to_owned),
    }
}

#[tokio::test]
async fn should_update_and_bump_version_when_version_matches() {
    let db = test_db().await;
    let seeded = seed_assignment(&db, PersonId::new(), week(0), "ICU").await;
    let guard = test_guard(&db);

    let updated = guard
        .update(seeded.id, 1, |current| {
            edit(&format!("{} nights", current.rotation), Some("covering"))
        })
        .await
        .unwrap();

    assert_eq!(updated.version, 2);
    assert_eq!(updated.rotation, "ICU nights");
    let stored = load_assignment(&db, seeded.id).await;
    assert_eq!(stored.version, 2);
    assert_eq!(stored.notes.as_deref(), Some("covering"));
    assert_eq!(stored.person_id, seeded.person_id);

    let emitted = outbox_events_for(&db, &seeded.id.to_string()).await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event_type, events::ASSIGNMENT_UPDATED);
    assert_eq!(emitted[0].payload["previous_version"], 1);
    assert_eq!(emitted[0].payload["version"], 2);
}

#[tokio::test]
async fn should_report_conflict_for_stale_version() {
    let db = test_db().await;
    let seeded = seed_assignment(&db, PersonId::new(), week(0), "ICU").await;
    let guard = test_guard(&db);
    guard
        .update(seeded.id, 1, |_| edit("Clinic", None))
        .await
        .unwrap();

    let result = guard.update(seeded.id, 1, |_| edit("Wards", None)).await;

    match result {
        Err(CoordinatorError::OptimisticConflict {
            entity,
            id,
            expected,
            actual,
        }) => {
            assert_eq!(entity, "assignment");
            assert_eq!(id, seeded.id.as_uuid());
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected OptimisticConflict, got {other:?}"),
    }
    let stored = load_assignment(&db, seeded.id).await;
    assert_eq!(stored.rotation, "Clinic");
    assert_eq!(outbox_events_for(&db, &seeded.id.to_string()).await.len(), 1);
}

#[tokio::test]
async fn should_let_only_one_of_two_writers_with_same_version_win() {
    let db = test_db().await;
    let seeded = seed_assignment(&db, PersonId::new(), week(0), "ICU").await;
    let guard = test_guard(&db);

    let (first, second) = tokio::join!(
        guard.update(seeded.id, 1, |_| edit("Clinic", None)),
        guard.update(seeded.id, 1, |_| edit("Wards", None)),
    );

    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(
        loser,
        Err(CoordinatorError::OptimisticConflict { actual: 2, .. })
    ));
    assert_eq!(load_assignment(&db, seeded.id).await.version, 2);
}

#[tokio::test]
async fn should_reject_empty_rotation_without_writing() {
    let db = test_db().await;
    let seeded = seed_assignment(&db, PersonId::new(), week(0), "ICU").await;
    let guard = test_guard(&db);

    let result = guard.update(seeded.id, 1, |_| edit("  ", None)).await;

    assert!(matches!(result, Err(CoordinatorError::Validation(_))));
    assert_eq!(load_assignment(&db, seeded.id).await.version, 1);
    assert!(outbox_events_for(&db, &seeded.id.to_string()).await.is_empty());
}

#[tokio::test]
async fn should_report_missing_assignment() {
    let db = test_db().await;
    let guard = test_guard(&db);

    let result = guard
        .update(AssignmentId::new(), 1, |_| edit("ICU", None))
        .await;

    assert!(matches!(
        result,
        Err(CoordinatorError::NotFound {
            entity: "assignment",
            ..
        })
    ));
}
