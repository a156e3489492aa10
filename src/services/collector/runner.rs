use async_trait::async_trait;

use crate::config::WorkerConfig;
use crate::services::collector::{BatchDispatcher, FetchJob};
use crate::services::queue::{JobError, JobHandler, JobKind, JobOptions};

/// Routes queued jobs to the fetch job or the batch dispatcher
pub struct JobRunner {
    fetch: FetchJob,
    dispatcher: BatchDispatcher,
    fetch_options: JobOptions,
    dispatch_options: JobOptions,
}

impl JobRunner {
    pub fn new(fetch: FetchJob, dispatcher: BatchDispatcher, config: &WorkerConfig) -> Self {
        Self {
            fetch,
            dispatcher,
            fetch_options: config.fetch_job,
            dispatch_options: config.dispatch_job,
        }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, kind: &JobKind) -> Result<(), JobError> {
        match kind {
            JobKind::FetchEntity { entity_key } => {
                let outcome = self.fetch.run(entity_key).await?;
                tracing::debug!("Fetch of {} finished: {}", entity_key, outcome.status());
            }
            JobKind::DispatchBatch => {
                self.dispatcher.run().await?;
            }
        }
        Ok(())
    }

    fn options(&self, kind: &JobKind) -> JobOptions {
        match kind {
            JobKind::FetchEntity { .. } => self.fetch_options,
            JobKind::DispatchBatch => self.dispatch_options,
        }
    }
}
