use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlConnection, Pool};

use crate::modules::snapshot::model::{SnapshotData, SnapshotRow};
use crate::services::collector::PersistenceError;

pub struct SnapshotCrud {
    pool: Pool<MySql>,
}

impl SnapshotCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    /// Most recent snapshot by `fetched_at`, newest id winning ties
    pub async fn get_latest(&self, entity_id: i64) -> Result<Option<SnapshotRow>, sqlx::Error> {
        sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, entity_id, fetched_at, overall_rank, overall_level,
                   overall_experience, skills, bosses
            FROM snapshots
            WHERE entity_id = ?
            ORDER BY fetched_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn count_for_entity(&self, entity_id: i64) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn insert(
        conn: &mut MySqlConnection,
        entity_id: i64,
        fetched_at: DateTime<Utc>,
        data: &SnapshotData,
    ) -> Result<i64, PersistenceError> {
        let skills = serde_json::to_string(&data.skills)?;
        let bosses = serde_json::to_string(&data.bosses)?;

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (
                entity_id, fetched_at, overall_rank, overall_level,
                overall_experience, skills, bosses
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity_id)
        .bind(fetched_at)
        .bind(data.overall.rank)
        .bind(data.overall.level)
        .bind(data.overall.experience)
        .bind(skills)
        .bind(bosses)
        .execute(conn)
        .await?;

        Ok(result.last_insert_id() as i64)
    }
}
