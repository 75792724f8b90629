use chrono::Utc;
use sea_orm::ActiveValue::Set;

use rotation_coordinator::domain::repository::OutboxRepository;
use rotation_coordinator::error::PublishError;
use rotation_coordinator::infra::db::DbOutboxRepository;
use rotation_coordinator::worker::relay::RelaySettings;
use rotation_coordinator_schema::outbox_messages;
use rotation_domain::outbox::OutboxStatus;

use crate::helpers::{
    RecordingPublisher, backdate_outbox, enqueue_event, outbox_row, outbox_rows, test_db,
    test_relay,
};

// ── enqueue ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_number_messages_per_aggregate_from_one() {
    let db = test_db().await;

    let a1 = enqueue_event(&db, "a", 5).await;
    let a2 = enqueue_event(&db, "a", 5).await;
    let b1 = enqueue_event(&db, "b", 5).await;
    let a3 = enqueue_event(&db, "a", 5).await;

    assert_eq!((a1.sequence, a2.sequence, a3.sequence), (1, 2, 3));
    assert_eq!(b1.sequence, 1);
    assert_eq!(a1.status, OutboxStatus::Pending);
    assert_eq!(a1.retry_count, 0);
}

// ── happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_publish_pending_messages_in_aggregate_order() {
    let db = test_db().await;
    for aggregate in ["a", "b", "a", "b", "a"] {
        enqueue_event(&db, aggregate, 5).await;
    }
    let publisher = RecordingPublisher::new();
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.claimed, 5);
    assert_eq!(stats.published, 5);
    let delivered = publisher.delivered_keys();
    let a: Vec<i64> = delivered.iter().filter(|(id, _)| id == "a").map(|(_, s)| *s).collect();
    let b: Vec<i64> = delivered.iter().filter(|(id, _)| id == "b").map(|(_, s)| *s).collect();
    assert_eq!(a, vec![1, 2, 3]);
    assert_eq!(b, vec![1, 2]);

    for row in outbox_rows(&db).await {
        assert_eq!(row.status, "PUBLISHED");
        assert!(row.published_at.is_some());
        assert!(row.processing_started_at.is_some());
    }
}

#[tokio::test]
async fn should_do_nothing_when_outbox_is_empty() {
    let db = test_db().await;
    let publisher = RecordingPublisher::new();
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats, Default::default());
    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn should_respect_batch_size() {
    let db = test_db().await;
    for aggregate in ["a", "b", "c"] {
        enqueue_event(&db, aggregate, 5).await;
    }
    let publisher = RecordingPublisher::new();
    let relay = test_relay(&db, publisher.clone());

    let first = relay.run(2).await.unwrap();
    let second = relay.run(2).await.unwrap();

    assert_eq!(first.published, 2);
    assert_eq!(second.published, 1);
    assert_eq!(publisher.delivered_keys().len(), 3);
}

// ── failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_retry_transient_failures_then_dead_letter() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 3).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_aggregate("a", PublishError::Transient("broker unavailable".into()));
    let relay = test_relay(&db, publisher.clone());

    let first = relay.run_once().await.unwrap();
    assert_eq!(first.requeued, 1);
    let row = outbox_row(&db, message.id).await;
    assert_eq!(row.status, "PENDING");
    assert_eq!(row.retry_count, 1);
    assert!(row.processing_started_at.is_none());
    assert!(row.last_error.as_deref().unwrap().contains("broker unavailable"));

    let second = relay.run_once().await.unwrap();
    assert_eq!(second.requeued, 1);
    assert_eq!(outbox_row(&db, message.id).await.retry_count, 2);

    let third = relay.run_once().await.unwrap();
    assert_eq!(third.dead_lettered, 1);
    let row = outbox_row(&db, message.id).await;
    assert_eq!(row.status, "FAILED");
    assert_eq!(row.retry_count, 3);
    assert!(row.failed_at.is_some());

    // Dead letters are never picked up again.
    let fourth = relay.run_once().await.unwrap();
    assert_eq!(fourth.claimed, 0);
    assert_eq!(publisher.attempts(), 3);
}

#[tokio::test]
async fn should_requeue_permanent_failures_while_retries_remain() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 5).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_next(PublishError::Permanent("LOADING Redis is loading the dataset".into()));
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(stats.requeued, 1);
    let row = outbox_row(&db, message.id).await;
    assert_eq!(row.status, "PENDING");
    assert_eq!(row.retry_count, 1);
    assert!(row.failed_at.is_none());
    assert!(row.last_error.as_deref().unwrap().contains("LOADING"));

    let next = relay.run_once().await.unwrap();
    assert_eq!(next.published, 1);
    assert_eq!(outbox_row(&db, message.id).await.status, "PUBLISHED");
}

#[tokio::test]
async fn should_dead_letter_permanent_failures_only_at_max_retries() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 2).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_aggregate("a", PublishError::Permanent("payload rejected".into()));
    let relay = test_relay(&db, publisher.clone());

    assert_eq!(relay.run_once().await.unwrap().requeued, 1);
    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.dead_lettered, 1);
    let row = outbox_row(&db, message.id).await;
    assert_eq!(row.status, "FAILED");
    assert_eq!(row.retry_count, row.max_retries);
    assert!(row.last_error.as_deref().unwrap().contains("payload rejected"));
    assert_eq!(publisher.attempts(), 2);
}

#[tokio::test]
async fn should_not_schedule_retry_before_backoff_elapses() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 5).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_next(PublishError::Transient("timeout".into()));
    // Default settings: first retry waits five seconds.
    let mut relay = test_relay(&db, publisher.clone());
    relay.settings.backoff = RelaySettings::default().backoff;

    relay.run_once().await.unwrap();
    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.claimed, 0);
    let row = outbox_row(&db, message.id).await;
    assert_eq!(row.status, "PENDING");
    assert!(row.next_attempt_at > Utc::now());
}

// ── ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_hold_back_later_messages_of_a_failed_aggregate() {
    let db = test_db().await;
    enqueue_event(&db, "a", 5).await;
    enqueue_event(&db, "a", 5).await;
    enqueue_event(&db, "b", 5).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_aggregate("a", PublishError::Transient("partition offline".into()));
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.claimed, 3);
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(publisher.delivered_keys(), vec![("b".to_owned(), 1)]);
    // The released message is pending again without a retry charged to it.
    let rows = outbox_rows(&db).await;
    let held = rows.iter().find(|r| r.aggregate_id == "a" && r.sequence == 2).unwrap();
    assert_eq!(held.status, "PENDING");
    assert_eq!(held.retry_count, 0);

    publisher.heal_aggregate("a");
    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.published, 2);
    assert_eq!(
        publisher.delivered_keys(),
        vec![("b".to_owned(), 1), ("a".to_owned(), 1), ("a".to_owned(), 2)]
    );
}

#[tokio::test]
async fn should_not_claim_past_a_message_still_processing() {
    let db = test_db().await;
    enqueue_event(&db, "a", 5).await;
    enqueue_event(&db, "a", 5).await;
    let repo = DbOutboxRepository { db: db.clone() };

    let first = repo.claim_batch(1, Utc::now()).await.unwrap();
    let second = repo.claim_batch(10, Utc::now()).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].sequence, 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn should_let_only_one_claimer_win_a_message() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 5).await;
    let repo = DbOutboxRepository { db: db.clone() };

    let claimed = repo.claim_batch(10, Utc::now()).await.unwrap();
    assert_eq!(claimed.len(), 1);

    assert!(repo.mark_published(message.id, Utc::now()).await.unwrap());
    // A second owner finishing late loses every conditional transition.
    assert!(!repo.mark_published(message.id, Utc::now()).await.unwrap());
    assert!(!repo.schedule_retry(message.id, Utc::now(), "late").await.unwrap());
    assert!(!repo.mark_failed(message.id, "late", Utc::now()).await.unwrap());
    assert!(!repo.release(message.id).await.unwrap());
    assert_eq!(outbox_row(&db, message.id).await.status, "PUBLISHED");
}

// ── crash recovery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn should_reclaim_messages_stuck_in_processing() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 5).await;
    let repo = DbOutboxRepository { db: db.clone() };
    repo.claim_batch(10, Utc::now()).await.unwrap();
    // The relay that claimed it died an hour ago.
    backdate_outbox(
        &db,
        message.id,
        outbox_messages::ActiveModel {
            processing_started_at: Set(Some(Utc::now() - chrono::Duration::hours(1))),
            ..Default::default()
        },
    )
    .await;
    let publisher = RecordingPublisher::new();
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(outbox_row(&db, message.id).await.status, "PUBLISHED");
}

#[tokio::test]
async fn should_leave_recent_processing_messages_alone() {
    let db = test_db().await;
    let message = enqueue_event(&db, "a", 5).await;
    let repo = DbOutboxRepository { db: db.clone() };
    repo.claim_batch(10, Utc::now()).await.unwrap();
    let publisher = RecordingPublisher::new();
    let relay = test_relay(&db, publisher.clone());

    let stats = relay.run_once().await.unwrap();

    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.claimed, 0);
    assert_eq!(outbox_row(&db, message.id).await.status, "PROCESSING");
}
