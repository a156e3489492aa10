use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool};

use crate::modules::entity::{EntityCrud, TrackedEntity};
use crate::modules::snapshot::{SnapshotCrud, SnapshotData, StoredSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),
}

/// Storage the collection pipeline reads entities from and writes snapshots to
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn get_entity(&self, entity_key: &str) -> Result<Option<TrackedEntity>, PersistenceError>;

    async fn list_active_entities(&self) -> Result<Vec<TrackedEntity>, PersistenceError>;

    async fn get_latest_snapshot(
        &self,
        entity_id: i64,
    ) -> Result<Option<StoredSnapshot>, PersistenceError>;

    /// Advance `last_fetched` and, when `snapshot` is given, insert it.
    /// Both writes commit together or not at all; returns the new snapshot id.
    async fn record_fetch(
        &self,
        entity_id: i64,
        fetched_at: DateTime<Utc>,
        snapshot: Option<&SnapshotData>,
    ) -> Result<Option<i64>, PersistenceError>;
}

pub struct MySqlSnapshotRepository {
    pool: Pool<MySql>,
    entities: EntityCrud,
    snapshots: SnapshotCrud,
}

impl MySqlSnapshotRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self {
            entities: EntityCrud::new(pool.clone()),
            snapshots: SnapshotCrud::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl SnapshotRepository for MySqlSnapshotRepository {
    async fn get_entity(&self, entity_key: &str) -> Result<Option<TrackedEntity>, PersistenceError> {
        Ok(self.entities.get_by_key(entity_key).await?)
    }

    async fn list_active_entities(&self) -> Result<Vec<TrackedEntity>, PersistenceError> {
        Ok(self.entities.list_active().await?)
    }

    async fn get_latest_snapshot(
        &self,
        entity_id: i64,
    ) -> Result<Option<StoredSnapshot>, PersistenceError> {
        match self.snapshots.get_latest(entity_id).await? {
            Some(row) => Ok(Some(StoredSnapshot::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn record_fetch(
        &self,
        entity_id: i64,
        fetched_at: DateTime<Utc>,
        snapshot: Option<&SnapshotData>,
    ) -> Result<Option<i64>, PersistenceError> {
        // Dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;

        let advanced = EntityCrud::update_last_fetched(&mut *tx, entity_id, fetched_at).await?;
        if !advanced {
            tracing::debug!(
                "last_fetched for entity {} already past {}; leaving it",
                entity_id,
                fetched_at
            );
        }

        let snapshot_id = match snapshot {
            Some(data) => Some(SnapshotCrud::insert(&mut *tx, entity_id, fetched_at, data).await?),
            None => None,
        };

        tx.commit().await?;
        Ok(snapshot_id)
    }
}
