pub mod client;
pub mod rate_limiter;
pub mod retry;
pub mod types;

pub use client::{ClientConfig, HiscoreClient, StatsSource};
pub use rate_limiter::RequestSpacer;
pub use retry::{calculate_retry_schedule, RetryConfig};
pub use types::{category_key, parse_body, ClientError, ABSENT_SENTINEL};
