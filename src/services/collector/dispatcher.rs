use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::modules::entity::TrackedEntity;
use crate::services::collector::{PersistenceError, SnapshotRepository};
use crate::services::metrics::CollectorMetrics;
use crate::services::queue::{JobHandle, JobKind, QueueError, TaskQueue};

/// Never-fetched entities are always due; otherwise due once a full interval
/// has elapsed, boundary included.
pub fn is_due(entity: &TrackedEntity, now: DateTime<Utc>) -> bool {
    match entity.last_fetched {
        None => true,
        Some(last) => now - last >= entity.fetch_interval(),
    }
}

/// Enqueue a single fetch for `entity_key`, outside of any batch
pub async fn trigger_fetch(queue: &dyn TaskQueue, entity_key: &str) -> Result<JobHandle, QueueError> {
    queue
        .enqueue(JobKind::FetchEntity {
            entity_key: entity_key.to_string(),
        })
        .await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueFailure {
    pub entity_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub due: usize,
    pub enqueued: usize,
    pub failed_enqueues: Vec<EnqueueFailure>,
}

/// Enqueues a fetch job for every active entity that is due
pub struct BatchDispatcher {
    repository: Arc<dyn SnapshotRepository>,
    queue: Arc<dyn TaskQueue>,
    metrics: Option<Arc<CollectorMetrics>>,
}

impl BatchDispatcher {
    pub fn new(repository: Arc<dyn SnapshotRepository>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            repository,
            queue,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run(&self) -> Result<DispatchSummary, PersistenceError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<DispatchSummary, PersistenceError> {
        let entities = self.repository.list_active_entities().await?;
        let mut summary = DispatchSummary {
            processed: entities.len(),
            ..Default::default()
        };

        for entity in entities.iter().filter(|entity| is_due(entity, now)) {
            summary.due += 1;

            match trigger_fetch(self.queue.as_ref(), &entity.external_key).await {
                Ok(_) => summary.enqueued += 1,
                Err(e) => {
                    tracing::warn!("Failed to enqueue fetch for {}: {}", entity.external_key, e);
                    summary.failed_enqueues.push(EnqueueFailure {
                        entity_key: entity.external_key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_dispatch(summary.due, summary.enqueued, summary.failed_enqueues.len());
        }

        tracing::info!(
            "Batch dispatch: {} active, {} due, {} enqueued, {} failed",
            summary.processed,
            summary.due,
            summary.enqueued,
            summary.failed_enqueues.len()
        );

        Ok(summary)
    }
}
