use serde::Deserialize;
use std::collections::BTreeMap;

use crate::modules::snapshot::{BossStats, SkillStats, SnapshotData};

/// Value the upstream source uses for "not ranked / not reported"
pub const ABSENT_SENTINEL: i64 = -1;

const OVERALL_SKILL: &str = "Overall";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Entity not found upstream: {0}")]
    NotFoundUpstream(String),
    #[error("Rate limited by upstream")]
    RateLimited,
    #[error("Upstream unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether an outer retry layer should try again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFoundUpstream(_) => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Body of a successful hiscore lookup
#[derive(Debug, Deserialize)]
pub struct HiscoreResponse {
    pub skills: Vec<RawSkill>,
    pub activities: Vec<RawActivity>,
}

#[derive(Debug, Deserialize)]
pub struct RawSkill {
    pub name: String,
    pub rank: i64,
    pub level: i64,
    pub xp: i64,
}

#[derive(Debug, Deserialize)]
pub struct RawActivity {
    pub name: String,
    pub rank: i64,
    pub score: i64,
}

fn present(value: i64) -> Option<i64> {
    (value != ABSENT_SENTINEL).then_some(value)
}

/// Normalize an upstream display name into a stable map key,
/// e.g. "Chambers of Xeric: Challenge Mode" -> "chambers_of_xeric_challenge_mode"
pub fn category_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_lowercase());
        } else if !key.is_empty() && !key.ends_with('_') {
            key.push('_');
        }
    }
    while key.ends_with('_') {
        key.pop();
    }
    key
}

impl From<&RawSkill> for SkillStats {
    fn from(raw: &RawSkill) -> Self {
        Self {
            rank: present(raw.rank),
            level: present(raw.level),
            experience: present(raw.xp),
        }
    }
}

impl From<&RawActivity> for BossStats {
    fn from(raw: &RawActivity) -> Self {
        Self {
            rank: present(raw.rank),
            kill_count: present(raw.score),
        }
    }
}

impl HiscoreResponse {
    pub fn into_snapshot_data(self) -> Result<SnapshotData, ClientError> {
        let mut overall = None;
        let mut skills = BTreeMap::new();

        for raw in &self.skills {
            if raw.name.eq_ignore_ascii_case(OVERALL_SKILL) {
                overall.get_or_insert_with(|| SkillStats::from(raw));
                continue;
            }
            let key = category_key(&raw.name);
            if key.is_empty() {
                return Err(ClientError::Protocol(format!("unnamed skill row: {:?}", raw.name)));
            }
            skills.insert(key, SkillStats::from(raw));
        }

        let overall = overall
            .ok_or_else(|| ClientError::Protocol("response has no Overall row".to_string()))?;

        let mut bosses = BTreeMap::new();
        for raw in &self.activities {
            let key = category_key(&raw.name);
            if key.is_empty() {
                return Err(ClientError::Protocol(format!("unnamed activity row: {:?}", raw.name)));
            }
            bosses.insert(key, BossStats::from(raw));
        }

        Ok(SnapshotData {
            overall,
            skills,
            bosses,
        })
    }
}

/// Parse a raw response body into normalized snapshot data
pub fn parse_body(body: &str) -> Result<SnapshotData, ClientError> {
    if body.trim().is_empty() {
        return Err(ClientError::Protocol("empty response body".to_string()));
    }

    let response: HiscoreResponse =
        serde_json::from_str(body).map_err(|e| ClientError::Protocol(e.to_string()))?;

    response.into_snapshot_data()
}
