use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlConnection, Pool};

use crate::modules::entity::model::TrackedEntity;

const ENTITY_COLUMNS: &str = "id, external_key, active, fetch_interval_secs, last_fetched";

pub struct EntityCrud {
    pool: Pool<MySql>,
}

impl EntityCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub async fn get_by_key(&self, external_key: &str) -> Result<Option<TrackedEntity>, sqlx::Error> {
        sqlx::query_as::<_, TrackedEntity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM tracked_entities WHERE external_key = ?"
        ))
        .bind(external_key)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<TrackedEntity>, sqlx::Error> {
        sqlx::query_as::<_, TrackedEntity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM tracked_entities WHERE active = TRUE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// Advance `last_fetched`. The guard keeps the marker from moving
    /// backwards when two fetches for the same entity commit out of order;
    /// returns whether the row was updated.
    pub async fn update_last_fetched(
        conn: &mut MySqlConnection,
        entity_id: i64,
        fetched_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_entities
            SET last_fetched = ?
            WHERE id = ?
              AND (last_fetched IS NULL OR last_fetched <= ?)
            "#,
        )
        .bind(fetched_at)
        .bind(entity_id)
        .bind(fetched_at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
