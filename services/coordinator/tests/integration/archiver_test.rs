use chrono::{Duration, Utc};

use rotation_coordinator::error::PublishError;
use rotation_coordinator::infra::db::DbOutboxRepository;
use rotation_coordinator::worker::archiver::{ArchiveSettings, OutboxArchiver};

use crate::helpers::{
    RecordingPublisher, archive_rows, enqueue_event, outbox_rows, set_archived_at, set_failed_at,
    set_published_at, test_db, test_relay,
};

fn archiver(db: &sea_orm::DatabaseConnection) -> OutboxArchiver<DbOutboxRepository> {
    OutboxArchiver {
        repo: DbOutboxRepository { db: db.clone() },
        settings: ArchiveSettings::default(),
    }
}

#[tokio::test]
async fn should_archive_only_published_messages_past_the_cutoff() {
    let db = test_db().await;
    let old = enqueue_event(&db, "a", 5).await;
    let recent = enqueue_event(&db, "b", 5).await;
    test_relay(&db, RecordingPublisher::new()).run_once().await.unwrap();
    let pending = enqueue_event(&db, "c", 5).await;
    set_published_at(&db, old.id, Utc::now() - Duration::hours(48)).await;

    let archived = archiver(&db).archive_published(1000, 24).await.unwrap();

    assert_eq!(archived, 1);
    let archive = archive_rows(&db).await;
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].id, old.id.as_uuid());
    assert_eq!(archive[0].status, "PUBLISHED");
    assert_eq!(archive[0].sequence, 1);
    let live: Vec<_> = outbox_rows(&db).await.into_iter().map(|r| r.id).collect();
    assert_eq!(live, vec![recent.id.as_uuid(), pending.id.as_uuid()]);
}

#[tokio::test]
async fn should_archive_in_bounded_batches_and_be_idempotent() {
    let db = test_db().await;
    let mut ids = Vec::new();
    for aggregate in ["a", "b", "c"] {
        ids.push(enqueue_event(&db, aggregate, 5).await.id);
    }
    test_relay(&db, RecordingPublisher::new()).run_once().await.unwrap();
    for id in &ids {
        set_published_at(&db, *id, Utc::now() - Duration::hours(30)).await;
    }
    let archiver = archiver(&db);

    assert_eq!(archiver.archive_published(2, 24).await.unwrap(), 2);
    assert_eq!(archiver.archive_published(2, 24).await.unwrap(), 1);
    assert_eq!(archiver.archive_published(2, 24).await.unwrap(), 0);

    assert_eq!(archive_rows(&db).await.len(), 3);
    assert!(outbox_rows(&db).await.is_empty());
}

#[tokio::test]
async fn should_never_archive_failed_messages() {
    let db = test_db().await;
    let dead = enqueue_event(&db, "a", 1).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_next(PublishError::Permanent("rejected".into()));
    test_relay(&db, publisher).run_once().await.unwrap();
    set_failed_at(&db, dead.id, Utc::now() - Duration::hours(48)).await;

    let archived = archiver(&db).archive_published(1000, 24).await.unwrap();

    assert_eq!(archived, 0);
    assert_eq!(outbox_rows(&db).await.len(), 1);
}

#[tokio::test]
async fn should_prune_archive_rows_past_retention() {
    let db = test_db().await;
    let expired = enqueue_event(&db, "a", 5).await;
    let kept = enqueue_event(&db, "b", 5).await;
    test_relay(&db, RecordingPublisher::new()).run_once().await.unwrap();
    for id in [expired.id, kept.id] {
        set_published_at(&db, id, Utc::now() - Duration::hours(48)).await;
    }
    let archiver = archiver(&db);
    assert_eq!(archiver.archive_published(1000, 24).await.unwrap(), 2);
    set_archived_at(&db, expired.id, Utc::now() - Duration::days(91)).await;

    let pruned = archiver.prune_archive(1000, 90).await.unwrap();

    assert_eq!(pruned, 1);
    let archive = archive_rows(&db).await;
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].id, kept.id.as_uuid());
    assert_eq!(archiver.prune_archive(1000, 90).await.unwrap(), 0);
}

#[tokio::test]
async fn should_prune_only_old_dead_letters() {
    let db = test_db().await;
    let old = enqueue_event(&db, "a", 1).await;
    let fresh = enqueue_event(&db, "b", 1).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_next(PublishError::Permanent("rejected".into()));
    publisher.fail_next(PublishError::Permanent("rejected".into()));
    test_relay(&db, publisher).run_once().await.unwrap();
    let waiting = enqueue_event(&db, "c", 5).await;
    set_failed_at(&db, old.id, Utc::now() - Duration::days(31)).await;

    let pruned = archiver(&db).prune_dead_letters(1000, 30).await.unwrap();

    assert_eq!(pruned, 1);
    let live: Vec<_> = outbox_rows(&db).await.into_iter().map(|r| r.id).collect();
    assert_eq!(live, vec![fresh.id.as_uuid(), waiting.id.as_uuid()]);
}

#[tokio::test]
async fn should_run_every_maintenance_step_with_configured_thresholds() {
    let db = test_db().await;
    let published = enqueue_event(&db, "a", 5).await;
    let dead = enqueue_event(&db, "b", 1).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_aggregate("b", PublishError::Permanent("rejected".into()));
    test_relay(&db, publisher).run_once().await.unwrap();
    set_published_at(&db, published.id, Utc::now() - Duration::hours(25)).await;
    set_failed_at(&db, dead.id, Utc::now() - Duration::days(40)).await;
    let archiver = OutboxArchiver {
        settings: ArchiveSettings {
            batch_size: 1,
            ..ArchiveSettings::default()
        },
        ..archiver(&db)
    };

    let stats = archiver.run_maintenance().await.unwrap();

    assert_eq!(stats.archived, 1);
    assert_eq!(stats.archive_pruned, 0);
    assert_eq!(stats.dead_letters_pruned, 1);
    assert!(outbox_rows(&db).await.is_empty());
    assert_eq!(archive_rows(&db).await.len(), 1);
}
