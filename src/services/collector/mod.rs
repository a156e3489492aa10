pub mod dedup;
pub mod dispatcher;
pub mod fetch_job;
pub mod outcome;
pub mod persistence;
pub mod runner;

pub use dedup::changed;
pub use dispatcher::{is_due, trigger_fetch, BatchDispatcher, DispatchSummary, EnqueueFailure};
pub use fetch_job::{FetchJob, FetchJobError};
pub use outcome::FetchOutcome;
pub use persistence::{MySqlSnapshotRepository, PersistenceError, SnapshotRepository};
pub use runner::JobRunner;
