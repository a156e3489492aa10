use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::common::{InMemoryRepository, RecordingQueue};
use stats_collector::services::collector::{trigger_fetch, BatchDispatcher, PersistenceError};
use stats_collector::services::metrics::CollectorMetrics;
use stats_collector::services::queue::JobKind;

fn fetch_of(key: &str) -> JobKind {
    JobKind::FetchEntity {
        entity_key: key.to_string(),
    }
}

#[tokio::test]
async fn test_enqueues_only_due_entities() {
    let repository = Arc::new(InMemoryRepository::new());
    let queue = Arc::new(RecordingQueue::new());
    let now = Utc::now();

    repository.add_entity("never", 3600, None);
    repository.add_entity("stale", 3600, Some(now - Duration::minutes(61)));
    repository.add_entity("boundary", 3600, Some(now - Duration::minutes(60)));
    repository.add_entity("fresh", 3600, Some(now - Duration::minutes(10)));
    repository.add_entity("inactive", 3600, None);
    repository.set_active("inactive", false);

    let dispatcher = BatchDispatcher::new(repository.clone(), queue.clone());
    let summary = dispatcher.run_at(now).await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.due, 3);
    assert_eq!(summary.enqueued, 3);
    assert!(summary.failed_enqueues.is_empty());

    let enqueued = queue.enqueued();
    assert!(enqueued.contains(&fetch_of("never")));
    assert!(enqueued.contains(&fetch_of("stale")));
    assert!(enqueued.contains(&fetch_of("boundary")));
    assert!(!enqueued.contains(&fetch_of("fresh")));
    assert!(!enqueued.contains(&fetch_of("inactive")));
}

#[tokio::test]
async fn test_one_failed_enqueue_does_not_abort_batch() {
    let repository = Arc::new(InMemoryRepository::new());
    let queue = Arc::new(RecordingQueue::new());

    repository.add_entity("alpha", 60, None);
    repository.add_entity("bravo", 60, None);
    repository.add_entity("charlie", 60, None);
    queue.reject_key("bravo");

    let metrics = CollectorMetrics::new().unwrap();
    let dispatcher =
        BatchDispatcher::new(repository.clone(), queue.clone()).with_metrics(metrics.clone());
    let summary = dispatcher.run().await.unwrap();

    assert_eq!(summary.due, 3);
    assert_eq!(summary.enqueued, 2);
    assert_eq!(summary.failed_enqueues.len(), 1);
    assert_eq!(summary.failed_enqueues[0].entity_key, "bravo");
    assert!(queue.enqueued().contains(&fetch_of("charlie")));

    let failed = metrics
        .dispatch_entities_total
        .with_label_values(&["failed"])
        .get();
    assert_eq!(failed, 1.0);
}

#[tokio::test]
async fn test_listing_failure_fails_run() {
    let repository = Arc::new(InMemoryRepository::new());
    let queue = Arc::new(RecordingQueue::new());
    repository.add_entity("alpha", 60, None);
    repository.fail_reads(true);

    let dispatcher = BatchDispatcher::new(repository.clone(), queue.clone());
    let result = dispatcher.run().await;

    assert!(matches!(result, Err(PersistenceError::Unavailable(_))));
    assert!(queue.enqueued().is_empty());
}

#[tokio::test]
async fn test_manual_trigger_enqueues_single_fetch() {
    let queue = RecordingQueue::new();

    let handle = trigger_fetch(&queue, "zezima").await.unwrap();

    assert_eq!(queue.enqueued(), vec![fetch_of("zezima")]);
    assert_eq!(queue.scheduled()[0].0.id, handle.id);
}
