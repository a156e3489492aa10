pub mod collector;
pub mod hiscore;
pub mod metrics;
pub mod queue;
pub mod redis_cache;
pub mod scheduler;
