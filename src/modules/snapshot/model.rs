use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rank/level/experience triple. `None` is the absent marker for a value the
/// upstream source did not report; it is never coerced to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillStats {
    pub rank: Option<i64>,
    pub level: Option<i64>,
    pub experience: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossStats {
    pub rank: Option<i64>,
    pub kill_count: Option<i64>,
}

/// The measured statistics of one snapshot, without identity or timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub overall: SkillStats,
    pub skills: BTreeMap<String, SkillStats>,
    pub bosses: BTreeMap<String, BossStats>,
}

/// Freshly fetched statistics that have not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub data: SnapshotData,
}

impl FetchedSnapshot {
    /// Stamp `data` with the current time, truncated to the microsecond
    /// precision of the `DATETIME(6)` columns so the stored value compares
    /// equal to the one handed back to callers.
    pub fn now(data: SnapshotData) -> Self {
        Self {
            fetched_at: Utc::now().trunc_subsecs(6),
            data,
        }
    }
}

/// An immutable, persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSnapshot {
    pub id: i64,
    pub entity_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub data: SnapshotData,
}

/// Flat row shape of the `snapshots` table; category maps are stored as JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub entity_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub overall_rank: Option<i64>,
    pub overall_level: Option<i64>,
    pub overall_experience: Option<i64>,
    pub skills: String,
    pub bosses: String,
}

impl TryFrom<SnapshotRow> for StoredSnapshot {
    type Error = serde_json::Error;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            entity_id: row.entity_id,
            fetched_at: row.fetched_at,
            data: SnapshotData {
                overall: SkillStats {
                    rank: row.overall_rank,
                    level: row.overall_level,
                    experience: row.overall_experience,
                },
                skills: serde_json::from_str(&row.skills)?,
                bosses: serde_json::from_str(&row.bosses)?,
            },
        })
    }
}
