pub mod config;
pub mod modules;
pub mod services;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::{init_db, Config, ConfigError, DbPool};
use services::collector::{
    BatchDispatcher, FetchJob, JobRunner, MySqlSnapshotRepository, SnapshotRepository,
};
use services::hiscore::{HiscoreClient, StatsSource};
use services::metrics::CollectorMetrics;
use services::queue::{JobHandle, QueueError, RedisTaskQueue, Worker};
use services::redis_cache::RedisService;
use services::scheduler::{DistributedScheduler, SchedulerError};

pub use services::collector::trigger_fetch;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// A fully wired collector process: one scheduler and one queue worker
pub struct CollectorApp {
    pub db: DbPool,
    pub metrics: Arc<CollectorMetrics>,
    pub queue: Arc<RedisTaskQueue>,
    scheduler: Arc<DistributedScheduler>,
    worker: Arc<Worker>,
    worker_cancel: CancellationToken,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CollectorApp {
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let db = init_db(&config.database_url, config.database_max_connections).await?;
        tracing::info!("Connected to MySQL");

        let metrics = CollectorMetrics::new()?;

        // The scheduler closes its store on stop; keep the queue on its own connection
        let queue_redis = RedisService::new(&config.redis_url)?;
        let store_redis = RedisService::new(&config.redis_url)?;

        let queue = Arc::new(RedisTaskQueue::new(queue_redis, &config.queue_key_prefix));
        let repository: Arc<dyn SnapshotRepository> =
            Arc::new(MySqlSnapshotRepository::new(db.clone()));
        let source: Arc<dyn StatsSource> =
            Arc::new(HiscoreClient::new(config.client.clone()).with_metrics(metrics.clone()));

        let fetch = FetchJob::new(repository.clone(), source).with_metrics(metrics.clone());
        let dispatcher =
            BatchDispatcher::new(repository, queue.clone()).with_metrics(metrics.clone());
        let runner = JobRunner::new(fetch, dispatcher, &config.worker);

        let worker = Worker::new(
            queue.clone(),
            Arc::new(runner),
            config.worker.concurrency,
            config.worker.poll_interval,
        )
        .with_metrics(metrics.clone());

        let scheduler = DistributedScheduler::new(
            Arc::new(store_redis),
            queue.clone(),
            config.scheduler.clone(),
        )
        .with_metrics(metrics.clone());

        Ok(Self {
            db,
            metrics,
            queue,
            scheduler: Arc::new(scheduler),
            worker: Arc::new(worker),
            worker_cancel: CancellationToken::new(),
            worker_handle: Mutex::new(None),
        })
    }

    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler.start().await?;

        let mut handle = self.worker_handle.lock().await;
        if handle.is_none() {
            let worker = self.worker.clone();
            let cancel = self.worker_cancel.clone();
            *handle = Some(tokio::spawn(worker.run(cancel)));
        }

        Ok(())
    }

    /// Enqueue a fetch for one entity outside the batch cycle
    pub async fn trigger_fetch(&self, entity_key: &str) -> Result<JobHandle, QueueError> {
        trigger_fetch(self.queue.as_ref(), entity_key).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;

        self.worker_cancel.cancel();
        if let Some(handle) = self.worker_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }

        match self.metrics.export() {
            Ok(text) => tracing::debug!("Final metrics:\n{}", text),
            Err(e) => tracing::warn!("Failed to export metrics: {}", e),
        }

        self.db.close().await;
    }
}
