use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A tracked subject whose statistics are snapshotted periodically.
///
/// Rows are owned by the surrounding CRUD layer; the collector only ever
/// writes `last_fetched`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedEntity {
    pub id: i64,
    pub external_key: String,
    pub active: bool,
    pub fetch_interval_secs: i64,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl TrackedEntity {
    pub fn fetch_interval(&self) -> Duration {
        Duration::seconds(self.fetch_interval_secs.max(0))
    }
}
