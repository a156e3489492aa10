use std::sync::Arc;
use std::time::Instant;

use crate::services::collector::{changed, FetchOutcome, PersistenceError, SnapshotRepository};
use crate::services::hiscore::{ClientError, StatsSource};
use crate::services::metrics::CollectorMetrics;

#[derive(Debug, thiserror::Error)]
pub enum FetchJobError {
    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] ClientError),
    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl FetchJobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_retryable(),
            Self::Persistence(_) => true,
        }
    }
}

/// Fetches one entity's statistics and stores a snapshot when they changed
pub struct FetchJob {
    repository: Arc<dyn SnapshotRepository>,
    source: Arc<dyn StatsSource>,
    metrics: Option<Arc<CollectorMetrics>>,
}

impl FetchJob {
    pub fn new(repository: Arc<dyn SnapshotRepository>, source: Arc<dyn StatsSource>) -> Self {
        Self {
            repository,
            source,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run(&self, entity_key: &str) -> Result<FetchOutcome, FetchJobError> {
        let started = Instant::now();
        let result = self.execute(entity_key).await;

        if let Some(metrics) = &self.metrics {
            let status = match &result {
                Ok(outcome) => outcome.status(),
                Err(_) => "failed",
            };
            metrics.record_fetch_outcome(status, started.elapsed().as_secs_f64());
        }

        result
    }

    async fn execute(&self, entity_key: &str) -> Result<FetchOutcome, FetchJobError> {
        let Some(entity) = self.repository.get_entity(entity_key).await? else {
            tracing::error!("Fetch requested for unknown entity {}", entity_key);
            return Ok(FetchOutcome::Error {
                entity_key: entity_key.to_string(),
                message: "entity not found".to_string(),
            });
        };

        if !entity.active {
            tracing::debug!("Skipping inactive entity {}", entity_key);
            return Ok(FetchOutcome::Skipped {
                entity_key: entity_key.to_string(),
                reason: "entity inactive".to_string(),
            });
        }

        let previous = self.repository.get_latest_snapshot(entity.id).await?;

        let fetched = match self.source.fetch(&entity.external_key).await {
            Ok(fetched) => fetched,
            Err(ClientError::NotFoundUpstream(_)) => {
                tracing::warn!("Entity {} not found upstream", entity_key);
                return Ok(FetchOutcome::Warning {
                    entity_key: entity_key.to_string(),
                    message: "entity not found upstream".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match previous.filter(|prev| !changed(&fetched.data, Some(&prev.data))) {
            Some(prev) => {
                self.repository
                    .record_fetch(entity.id, fetched.fetched_at, None)
                    .await?;

                tracing::debug!("No change for {} since snapshot {}", entity_key, prev.id);
                Ok(FetchOutcome::Unchanged {
                    entity_key: entity_key.to_string(),
                    snapshot_id: prev.id,
                    fetched_at: fetched.fetched_at,
                })
            }
            None => {
                let snapshot_id = self
                    .repository
                    .record_fetch(entity.id, fetched.fetched_at, Some(&fetched.data))
                    .await?
                    .ok_or_else(|| {
                        PersistenceError::Unavailable("snapshot insert returned no id".to_string())
                    })?;

                tracing::info!("Stored snapshot {} for {}", snapshot_id, entity_key);
                Ok(FetchOutcome::Success {
                    entity_key: entity_key.to_string(),
                    snapshot_id,
                    fetched_at: fetched.fetched_at,
                })
            }
        }
    }
}
