pub mod engine;
pub mod store;

pub use engine::{DistributedScheduler, PollDecision, SchedulerConfig, SchedulerError, SchedulerState};
pub use store::{ScheduleStore, StoreError};
