use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::services::collector::{FetchJobError, PersistenceError};
use crate::services::metrics::CollectorMetrics;
use crate::services::queue::{JobBackend, JobKind, JobOptions, QueuedJob};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchJobError),
    #[error("Batch dispatch failed: {0}")]
    Dispatch(#[from] PersistenceError),
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    /// Whether the queue should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Dispatch(_) | Self::Timeout(_) => true,
        }
    }
}

/// Executes claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, kind: &JobKind) -> Result<(), JobError>;

    fn options(&self, kind: &JobKind) -> JobOptions;
}

/// What the worker did with a claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    Completed,
    Retried { attempt: u32, ready_at: DateTime<Utc> },
    Buried,
}

/// Queue consumer.
///
/// Claims due jobs while it has a free slot, runs each under its kind's
/// timeout and reschedules retryable failures until the retry budget is
/// spent. Jobs that cannot run again go to the dead-letter list.
pub struct Worker {
    backend: Arc<dyn JobBackend>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    metrics: Option<Arc<CollectorMetrics>>,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume jobs until `cancel` fires, then wait for in-flight jobs
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        tracing::info!("Worker started with {} slots", self.concurrency);

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Job task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.backend.claim_due(Utc::now()).await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        worker.process(job).await;
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    tracing::warn!("Failed to claim job: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if !in_flight.is_empty() {
            tracing::info!("Worker stopping; waiting for {} in-flight jobs", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Job task panicked: {}", e);
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Run one claimed job to a disposition
    pub async fn process(&self, job: QueuedJob) -> JobDisposition {
        let options = self.handler.options(&job.kind);
        let kind = job.kind.name();

        let result = match tokio::time::timeout(options.timeout, self.handler.handle(&job.kind)).await
        {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(options.timeout)),
        };

        let error = match result {
            Ok(()) => {
                self.record(kind, "completed");
                return JobDisposition::Completed;
            }
            Err(e) => e,
        };

        if error.is_retryable() && job.attempt <= options.retry_count {
            let retry = job.next_attempt();
            let ready_at = Utc::now()
                + chrono::Duration::from_std(options.retry_delay).unwrap_or(chrono::Duration::zero());

            match self.backend.schedule(&retry, ready_at).await {
                Ok(()) => {
                    tracing::warn!(
                        "{} job {} failed (attempt {}/{}): {}; retrying at {}",
                        kind,
                        job.id,
                        job.attempt,
                        options.retry_count + 1,
                        error,
                        ready_at
                    );
                    self.record(kind, "retried");
                    return JobDisposition::Retried {
                        attempt: retry.attempt,
                        ready_at,
                    };
                }
                Err(e) => {
                    tracing::error!("Failed to reschedule {} job {}: {}", kind, job.id, e);
                }
            }
        }

        tracing::error!(
            "{} job {} failed permanently after {} attempt(s): {}",
            kind,
            job.id,
            job.attempt,
            error
        );
        if let Err(e) = self.backend.bury(&job, &error.to_string()).await {
            tracing::error!("Failed to bury {} job {}: {}", kind, job.id, e);
        }
        self.record(kind, "buried");
        JobDisposition::Buried
    }

    fn record(&self, kind: &str, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job(kind, result);
        }
    }
}
