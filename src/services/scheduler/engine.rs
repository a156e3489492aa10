use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::metrics::CollectorMetrics;
use crate::services::queue::{JobKind, TaskQueue};
use crate::services::scheduler::{ScheduleStore, StoreError};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub batch_interval: Duration,
    pub lock_ttl: Duration,
    pub last_run_key: String,
    pub lock_key: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_interval: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(30),
            last_run_key: "stats_collector:scheduler:last_global_run".to_string(),
            lock_key: "stats_collector:scheduler:lock".to_string(),
        }
    }
}

/// What one poll of the scheduler decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    NotDue,
    /// Another instance holds the election lock
    LockContended,
    /// Won the lock, but another instance dispatched since our first read
    AlreadyDispatched,
    Dispatched,
    DispatchFailed,
}

impl PollDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDue => "not_due",
            Self::LockContended => "lock_contended",
            Self::AlreadyDispatched => "already_dispatched",
            Self::Dispatched => "dispatched",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,
    #[error("Schedule store error: {0}")]
    Store(#[from] StoreError),
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Triggers one batch dispatch per `batch_interval` across all processes.
///
/// Every instance polls the shared store; when the interval has elapsed the
/// instances race for a TTL lock and only the winner enqueues the batch job
/// and records `last_global_run`.
pub struct DistributedScheduler {
    store: Arc<dyn ScheduleStore>,
    queue: Arc<dyn TaskQueue>,
    config: SchedulerConfig,
    instance_id: String,
    metrics: Option<Arc<CollectorMetrics>>,
    running: tokio::sync::Mutex<Option<Running>>,
    held_lock: Mutex<Option<String>>,
}

impl DistributedScheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        queue: Arc<dyn TaskQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            instance_id: Uuid::new_v4().to_string(),
            metrics: None,
            running: tokio::sync::Mutex::new(None),
            held_lock: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn state(&self) -> SchedulerState {
        if self.running.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.store.connect().await?;

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(token).await });

        *running = Some(Running { cancel, handle });
        tracing::info!(
            "Scheduler {} started (poll every {:?}, batch every {:?})",
            self.instance_id,
            self.config.poll_interval,
            self.config.batch_interval
        );
        Ok(())
    }

    /// Stop the loop once any in-progress poll has finished, release a lock
    /// left behind by a poll that panicked and close the store. No-op when
    /// already stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!("Scheduler loop ended abnormally: {}", e);
        }

        let held = self.held_lock().take();
        if let Some(token) = held {
            self.release_lock(&token).await;
        }

        self.store.close().await;
        tracing::info!("Scheduler {} stopped", self.instance_id);
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A started poll runs to completion so an enqueued batch is
            // always followed by its last_global_run write
            match self.poll_once().await {
                Ok(decision) => tracing::debug!("Scheduler poll: {}", decision.as_str()),
                Err(e) => {
                    self.record("store_error");
                    tracing::warn!("Scheduler poll skipped: {}", e);
                }
            }
        }
    }

    /// Run a single scheduling decision
    pub async fn poll_once(&self) -> Result<PollDecision, SchedulerError> {
        if !self.is_due(Utc::now()).await? {
            self.record(PollDecision::NotDue.as_str());
            return Ok(PollDecision::NotDue);
        }

        let token = format!("{}:{}", self.instance_id, Uuid::new_v4());
        let acquired = self
            .store
            .set_if_absent(&self.config.lock_key, &token, self.config.lock_ttl)
            .await?;
        if !acquired {
            self.record(PollDecision::LockContended.as_str());
            return Ok(PollDecision::LockContended);
        }
        *self.held_lock() = Some(token.clone());

        let result = self.dispatch_if_still_due().await;

        self.held_lock().take();
        self.release_lock(&token).await;

        let decision = result?;
        self.record(decision.as_str());
        Ok(decision)
    }

    async fn dispatch_if_still_due(&self) -> Result<PollDecision, SchedulerError> {
        let now = Utc::now();
        if !self.is_due(now).await? {
            return Ok(PollDecision::AlreadyDispatched);
        }

        match self.queue.enqueue(JobKind::DispatchBatch).await {
            Ok(handle) => {
                self.store
                    .set(
                        &self.config.last_run_key,
                        &now.to_rfc3339(),
                        Some(self.config.batch_interval * 2),
                    )
                    .await?;

                tracing::info!("Enqueued batch dispatch job {}", handle.id);
                Ok(PollDecision::Dispatched)
            }
            Err(e) => {
                tracing::error!("Failed to enqueue batch dispatch: {}", e);
                Ok(PollDecision::DispatchFailed)
            }
        }
    }

    async fn is_due(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(raw) = self.store.get(&self.config.last_run_key).await? else {
            return Ok(true);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(last) => Ok(now - last.with_timezone(&Utc) >= to_chrono(self.config.batch_interval)),
            Err(e) => {
                tracing::warn!("Ignoring unparseable last_global_run {:?}: {}", raw, e);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, token: &str) {
        match self.store.delete_if_equals(&self.config.lock_key, token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Scheduler lock expired before it was released"),
            Err(e) => tracing::warn!("Failed to release scheduler lock: {}", e),
        }
    }

    fn held_lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.held_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, decision: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_scheduler_poll(decision);
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
