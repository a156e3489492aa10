use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Work the collector knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    DispatchBatch,
    FetchEntity { entity_key: String },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DispatchBatch => "dispatch_batch",
            Self::FetchEntity { .. } => "fetch_entity",
        }
    }
}

/// Retry and timeout declaration of a job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Retries after the first attempt
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl JobOptions {
    pub fn fetch_default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn dispatch_default() -> Self {
        Self {
            retry_count: 1,
            retry_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A job as stored on the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: JobKind,
    /// 1-based attempt number this entry will run as
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Enqueue rejected: {0}")]
    Rejected(String),
}

/// Producer side of the task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, kind: JobKind) -> Result<JobHandle, QueueError>;
}

/// Consumer side of the task queue, used by the worker
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Put `job` back on the queue, runnable from `ready_at`
    async fn schedule(&self, job: &QueuedJob, ready_at: DateTime<Utc>) -> Result<(), QueueError>;

    /// Atomically take one job that is runnable at `now`
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, QueueError>;

    /// Move a terminally failed job to the dead-letter list
    async fn bury(&self, job: &QueuedJob, reason: &str) -> Result<(), QueueError>;
}
