use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::hiscore::{ClientConfig, RetryConfig};
use crate::services::queue::JobOptions;
use crate::services::scheduler::SchedulerConfig;

const DEFAULT_HISCORE_URL: &str =
    "https://secure.runescape.com/m=hiscore_oldschool/index_lite.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Environment configuration
/// Loads and validates environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub queue_key_prefix: String,
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
}

/// Queue consumer settings, including per-job retry declarations
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub fetch_job: JobOptions,
    pub dispatch_job: JobOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            fetch_job: JobOptions::fetch_default(),
            dispatch_job: JobOptions::dispatch_default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        let client = ClientConfig {
            base_url: env::var("HISCORE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_HISCORE_URL.to_string()),
            min_request_interval: Duration::from_millis(parse_env(
                "CLIENT_MIN_REQUEST_INTERVAL_MS",
                1000,
            )?),
            timeout: Duration::from_secs(parse_env("CLIENT_TIMEOUT_SECS", 10)?),
            retry: RetryConfig {
                max_attempts: parse_env("CLIENT_MAX_ATTEMPTS", 3)?,
                base_delay: Duration::from_millis(parse_env("CLIENT_BACKOFF_BASE_MS", 1000)?),
                multiplier: parse_env("CLIENT_BACKOFF_MULTIPLIER", 2.0)?,
                max_delay: Duration::from_millis(parse_env("CLIENT_BACKOFF_MAX_MS", 30_000)?),
                jitter_factor: 0.0,
            },
        };

        let scheduler = SchedulerConfig {
            poll_interval: Duration::from_secs(parse_env("SCHEDULER_POLL_INTERVAL_SECS", 10)?),
            batch_interval: Duration::from_secs(parse_env("SCHEDULER_BATCH_INTERVAL_SECS", 300)?),
            lock_ttl: Duration::from_secs(parse_env("SCHEDULER_LOCK_TTL_SECS", 30)?),
            ..SchedulerConfig::default()
        };

        let worker = WorkerConfig {
            concurrency: parse_env("WORKER_CONCURRENCY", 4)?,
            poll_interval: Duration::from_millis(parse_env("WORKER_POLL_INTERVAL_MS", 500)?),
            fetch_job: JobOptions {
                retry_count: parse_env("FETCH_JOB_RETRY_COUNT", 3)?,
                retry_delay: Duration::from_secs(parse_env("FETCH_JOB_RETRY_DELAY_SECS", 60)?),
                timeout: Duration::from_secs(parse_env("FETCH_JOB_TIMEOUT_SECS", 120)?),
            },
            dispatch_job: JobOptions {
                retry_count: parse_env("DISPATCH_JOB_RETRY_COUNT", 1)?,
                retry_delay: Duration::from_secs(parse_env("DISPATCH_JOB_RETRY_DELAY_SECS", 30)?),
                timeout: Duration::from_secs(parse_env("DISPATCH_JOB_TIMEOUT_SECS", 300)?),
            },
        };

        if worker.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url,
            queue_key_prefix: env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "stats_collector".to_string()),
            client,
            scheduler,
            worker,
        })
    }
}

/// Reads `key`, falling back to `default` when unset. A value that is set but
/// does not parse is an error.
fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
