pub mod redis_queue;
pub mod types;
pub mod worker;

pub use redis_queue::RedisTaskQueue;
pub use types::{JobBackend, JobHandle, JobKind, JobOptions, QueueError, QueuedJob, TaskQueue};
pub use worker::{JobDisposition, JobError, JobHandler, Worker};
