use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use serde::Serialize;

use crate::services::queue::{JobBackend, JobHandle, JobKind, QueueError, QueuedJob, TaskQueue};
use crate::services::redis_cache::RedisService;

/// Pops the lowest-scored member whose score is <= now
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
    return false
end
redis.call('ZREM', KEYS[1], due[1])
return due[1]
"#;

#[derive(Serialize)]
struct DeadLetter<'a> {
    job: &'a QueuedJob,
    reason: &'a str,
    buried_at: DateTime<Utc>,
}

/// Task queue on a Redis sorted set scored by ready time (epoch millis)
pub struct RedisTaskQueue {
    redis: RedisService,
    jobs_key: String,
    dead_key: String,
}

impl RedisTaskQueue {
    pub fn new(redis: RedisService, key_prefix: &str) -> Self {
        Self {
            redis,
            jobs_key: format!("{}:jobs", key_prefix),
            dead_key: format!("{}:dead", key_prefix),
        }
    }

    pub async fn pending_count(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.connection().await?;
        let count: u64 = redis::cmd("ZCARD")
            .arg(&self.jobs_key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, kind: JobKind) -> Result<JobHandle, QueueError> {
        let job = QueuedJob::new(kind);
        self.schedule(&job, job.enqueued_at).await?;

        tracing::debug!("Enqueued {} job {}", job.kind.name(), job.id);
        Ok(JobHandle { id: job.id })
    }
}

#[async_trait]
impl JobBackend for RedisTaskQueue {
    async fn schedule(&self, job: &QueuedJob, ready_at: DateTime<Utc>) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.redis.connection().await?;

        let _: () = redis::cmd("ZADD")
            .arg(&self.jobs_key)
            .arg(ready_at.timestamp_millis())
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.redis.connection().await?;
        let payload: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(&self.jobs_key)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<QueuedJob>(&payload) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                // Already removed from the queue; keep the raw payload for inspection
                tracing::error!("Dropping undecodable job payload: {}", e);
                let _: () = redis::cmd("LPUSH")
                    .arg(&self.dead_key)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn bury(&self, job: &QueuedJob, reason: &str) -> Result<(), QueueError> {
        let entry = serde_json::to_string(&DeadLetter {
            job,
            reason,
            buried_at: Utc::now(),
        })?;
        let mut conn = self.redis.connection().await?;

        let _: () = redis::cmd("LPUSH")
            .arg(&self.dead_key)
            .arg(entry)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}
