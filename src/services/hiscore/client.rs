use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::modules::snapshot::{FetchedSnapshot, SnapshotData};
use crate::services::hiscore::{parse_body, ClientError, RequestSpacer, RetryConfig};
use crate::services::metrics::CollectorMetrics;

/// Source of per-entity statistics snapshots
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self, entity_key: &str) -> Result<FetchedSnapshot, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub min_request_interval: Duration,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://secure.runescape.com/m=hiscore_oldschool/index_lite.json".to_string(),
            min_request_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Outcome of a single HTTP attempt
enum AttemptError {
    /// Worth another attempt: network failure, timeout, upstream 5xx
    Transient(String),
    Fatal(ClientError),
}

/// Hiscore API client
/// Spaces requests through its own [`RequestSpacer`] and retries transient failures
pub struct HiscoreClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
    spacer: Arc<RequestSpacer>,
    metrics: Option<Arc<CollectorMetrics>>,
}

impl HiscoreClient {
    pub fn new(config: ClientConfig) -> Self {
        let spacer = Arc::new(RequestSpacer::new(config.min_request_interval));
        Self::with_spacer(config, spacer)
    }

    /// Build a client around an existing spacer, so several clients can share one gate
    pub fn with_spacer(config: ClientConfig, spacer: Arc<RequestSpacer>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("stats-collector/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url,
            retry: config.retry,
            spacer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn attempt(&self, entity_key: &str) -> Result<SnapshotData, AttemptError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("player", entity_key)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Transient("request timeout".to_string())
                } else {
                    AttemptError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(AttemptError::Fatal(ClientError::NotFoundUpstream(
                    entity_key.to_string(),
                )))
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(AttemptError::Fatal(ClientError::RateLimited)),
            s if s.is_server_error() => {
                return Err(AttemptError::Transient(format!("upstream returned {}", s)))
            }
            s if !s.is_success() => {
                return Err(AttemptError::Fatal(ClientError::Protocol(format!(
                    "unexpected status {}",
                    s
                ))))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        parse_body(&body).map_err(AttemptError::Fatal)
    }

    fn record(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_client_request(result);
        }
    }
}

#[async_trait]
impl StatsSource for HiscoreClient {
    async fn fetch(&self, entity_key: &str) -> Result<FetchedSnapshot, ClientError> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.spacer.wait_turn().await;

            match self.attempt(entity_key).await {
                Ok(data) => {
                    self.record("ok");
                    return Ok(FetchedSnapshot::now(data));
                }
                Err(AttemptError::Fatal(e)) => {
                    self.record(e.kind());
                    return Err(e);
                }
                Err(AttemptError::Transient(last_error)) => {
                    self.record("transient");

                    if !self.retry.should_retry(attempts) {
                        tracing::error!(
                            "Giving up on {} after {} attempts: {}",
                            entity_key,
                            attempts,
                            last_error
                        );
                        return Err(ClientError::Unavailable {
                            attempts,
                            last_error,
                        });
                    }

                    let delay = self.retry.calculate_delay(attempts - 1);
                    tracing::warn!(
                        "Transient failure fetching {} (attempt {}/{}): {}; retrying in {:?}",
                        entity_key,
                        attempts,
                        self.retry.max_attempts,
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
