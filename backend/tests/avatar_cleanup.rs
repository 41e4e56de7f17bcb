//! Avatar replacement on the filesystem blob store, with the superseded
//! file removed by the background cleanup task.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ledger::domain::task_queue::handlers::DeleteOldAvatarHandler;
use ledger::domain::task_queue::{
    DeliveryOutcome, TaskDistributor, TaskKind, TaskProcessor, TaskProcessorConfig,
};
use ledger::domain::{BlobAvatarUpload, TxCoordinator, UserLifecycle, Username};
use ledger::outbound::blob::{LOCAL_HANDLER, build_blob_store};
use ledger::outbound::memory::{InMemoryLedgerStore, InMemoryTaskQueue};
use ledger::test_support::ledger::seed_user;
use ledger::test_support::{MutableClock, NoJitter};
use tempfile::TempDir;

#[tokio::test]
async fn replacing_an_avatar_deletes_the_previous_file() {
    let upload_dir = TempDir::new().expect("temp dir");
    let clock = Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).single().expect("valid time"),
    ));
    let coordinator = TxCoordinator::new(Arc::new(InMemoryLedgerStore::new(clock.clone())));
    let queue = Arc::new(InMemoryTaskQueue::default());
    let distributor = TaskDistributor::new(queue.clone(), clock.clone());
    let blobs = build_blob_store(LOCAL_HANDLER, upload_dir.path()).expect("blob store");
    let processor = TaskProcessor::new(queue, clock.clone(), TaskProcessorConfig::default())
        .with_jitter(Arc::new(NoJitter))
        .register(
            TaskKind::DeleteOldAvatar,
            Arc::new(DeleteOldAvatarHandler::new(blobs.clone())),
        );
    let users = UserLifecycle::new(coordinator.clone(), clock.clone());
    seed_user(&coordinator, "alice").await;
    let alice = Username::new("alice").expect("username");

    let first = users
        .replace_avatar(
            alice.clone(),
            "Holiday Photo.png",
            &BlobAvatarUpload::new(blobs.clone(), b"first".to_vec()),
            &distributor,
        )
        .await
        .expect("first avatar");
    assert!(first.cleanup_task.is_none());
    let first_location = first.update.user.avatar_url.clone().expect("avatar url");

    clock.advance_seconds(60);
    let second = users
        .replace_avatar(
            alice,
            "Holiday Photo.png",
            &BlobAvatarUpload::new(blobs, b"second".to_vec()),
            &distributor,
        )
        .await
        .expect("second avatar");
    let second_location = second.update.user.avatar_url.clone().expect("avatar url");
    assert_ne!(first_location, second_location);
    assert_eq!(second.update.previous_avatar_url.as_deref(), Some(first_location.as_str()));
    assert!(std::path::Path::new(&first_location).exists());

    let processed = processor.process_one().await.expect("poll").expect("cleanup task");

    assert_eq!(Some(processed.id), second.cleanup_task);
    assert_eq!(processed.outcome, DeliveryOutcome::Succeeded);
    assert!(!std::path::Path::new(&first_location).exists());
    assert!(std::path::Path::new(&second_location).exists());
}
