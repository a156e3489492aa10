use chrono::{DateTime, Utc};
use serde::Serialize;

/// Terminal result of one fetch job. Conditions the queue should retry are
/// returned as errors instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Data changed; a new snapshot was stored
    Success {
        entity_key: String,
        snapshot_id: i64,
        fetched_at: DateTime<Utc>,
    },
    /// Data matched the latest snapshot; only `last_fetched` moved
    Unchanged {
        entity_key: String,
        snapshot_id: i64,
        fetched_at: DateTime<Utc>,
    },
    Skipped {
        entity_key: String,
        reason: String,
    },
    /// The upstream source does not know the entity
    Warning {
        entity_key: String,
        message: String,
    },
    /// The entity is not tracked locally
    Error {
        entity_key: String,
        message: String,
    },
}

impl FetchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Unchanged { .. } => "unchanged",
            Self::Skipped { .. } => "skipped",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
        }
    }

    pub fn snapshot_id(&self) -> Option<i64> {
        match self {
            Self::Success { snapshot_id, .. } | Self::Unchanged { snapshot_id, .. } => {
                Some(*snapshot_id)
            }
            _ => None,
        }
    }
}
