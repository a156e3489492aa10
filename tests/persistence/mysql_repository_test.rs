use chrono::{Duration, DurationRound, Utc};
use serial_test::serial;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySql, Pool};
use std::sync::Arc;
use uuid::Uuid;

use crate::common::{snapshot_with_xp, ScriptedSource};
use stats_collector::config::init_db;
use stats_collector::modules::snapshot::{BossStats, SnapshotCrud};
use stats_collector::services::collector::{
    FetchJob, FetchOutcome, MySqlSnapshotRepository, SnapshotRepository,
};

fn test_db_url() -> Option<String> {
    dotenvy::dotenv().ok();

    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

/// Connects to TEST_DATABASE_URL (or DATABASE_URL); None when neither is reachable
async fn test_db() -> Option<Pool<MySql>> {
    let url = test_db_url()?;

    match init_db(&url, 5).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            println!("MySQL not available ({}). Skipping.", e);
            None
        }
    }
}

async fn insert_entity(db: &Pool<MySql>, key: &str) -> i64 {
    let result = sqlx::query(
        "INSERT INTO tracked_entities (external_key, active, fetch_interval_secs) VALUES (?, TRUE, 3600)",
    )
    .bind(key)
    .execute(db)
    .await
    .unwrap();
    result.last_insert_id() as i64
}

async fn cleanup(db: &Pool<MySql>, entity_id: i64) {
    sqlx::query("DELETE FROM snapshots WHERE entity_id = ?")
        .bind(entity_id)
        .execute(db)
        .await
        .ok();
    sqlx::query("DELETE FROM tracked_entities WHERE id = ?")
        .bind(entity_id)
        .execute(db)
        .await
        .ok();
}

#[tokio::test]
#[serial]
async fn test_record_fetch_round_trip() {
    let Some(db) = test_db().await else {
        return;
    };
    let key = format!("it-{}", Uuid::new_v4().simple());
    let entity_id = insert_entity(&db, &key).await;
    let repository = MySqlSnapshotRepository::new(db.clone());

    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.id, entity_id);
    assert_eq!(entity.last_fetched, None);
    assert!(repository
        .list_active_entities()
        .await
        .unwrap()
        .iter()
        .any(|e| e.id == entity_id));

    let fetched_at = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap();
    let mut data = snapshot_with_xp(100);
    data.bosses.insert(
        "zulrah".to_string(),
        BossStats {
            rank: None,
            kill_count: Some(12),
        },
    );

    let snapshot_id = repository
        .record_fetch(entity_id, fetched_at, Some(&data))
        .await
        .unwrap()
        .unwrap();

    let latest = repository.get_latest_snapshot(entity_id).await.unwrap().unwrap();
    assert_eq!(latest.id, snapshot_id);
    assert_eq!(latest.data, data);
    assert_eq!(latest.fetched_at, fetched_at);

    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.last_fetched, Some(fetched_at));

    cleanup(&db, entity_id).await;
}

#[tokio::test]
#[serial]
async fn test_last_fetched_never_moves_backwards() {
    let Some(db) = test_db().await else {
        return;
    };
    let key = format!("it-{}", Uuid::new_v4().simple());
    let entity_id = insert_entity(&db, &key).await;
    let repository = MySqlSnapshotRepository::new(db.clone());

    let newer = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap();
    let older = newer - Duration::minutes(5);

    repository.record_fetch(entity_id, newer, None).await.unwrap();
    let inserted = repository.record_fetch(entity_id, older, None).await.unwrap();
    assert_eq!(inserted, None);

    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.last_fetched, Some(newer));
    assert_eq!(SnapshotCrud::new(db.clone()).count_for_entity(entity_id).await.unwrap(), 0);

    cleanup(&db, entity_id).await;
}

#[tokio::test]
#[serial]
async fn test_fetch_job_timestamps_match_stored_rows() {
    let Some(db) = test_db().await else {
        return;
    };
    let key = format!("it-{}", Uuid::new_v4().simple());
    let entity_id = insert_entity(&db, &key).await;
    let repository = Arc::new(MySqlSnapshotRepository::new(db.clone()));
    let source = Arc::new(ScriptedSource::new());
    source.push_ok(snapshot_with_xp(100));
    let job = FetchJob::new(repository.clone(), source.clone());

    let outcome = job.run(&key).await.unwrap();
    let FetchOutcome::Success { fetched_at, .. } = outcome else {
        panic!("expected success, got {:?}", outcome);
    };

    let latest = repository.get_latest_snapshot(entity_id).await.unwrap().unwrap();
    assert_eq!(latest.fetched_at, fetched_at);
    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.last_fetched, Some(fetched_at));

    let outcome = job.run(&key).await.unwrap();
    let FetchOutcome::Unchanged { fetched_at, .. } = outcome else {
        panic!("expected unchanged, got {:?}", outcome);
    };
    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.last_fetched, Some(fetched_at));

    cleanup(&db, entity_id).await;
}

#[tokio::test]
#[serial]
async fn test_failed_snapshot_insert_rolls_back_last_fetched() {
    let Some(db) = test_db().await else {
        return;
    };
    let Some(url) = test_db_url() else {
        return;
    };
    let key = format!("it-{}", Uuid::new_v4().simple());
    let entity_id = insert_entity(&db, &key).await;

    // Single connection that gives up on row locks after one second
    let impatient = MySqlPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET SESSION innodb_lock_wait_timeout = 1").await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .unwrap();
    let repository = MySqlSnapshotRepository::new(impatient);

    // Gap-lock the entity's snapshot range so the insert times out after
    // last_fetched has already been updated inside the same transaction
    let mut blocker = db.begin().await.unwrap();
    sqlx::query("SELECT id FROM snapshots WHERE entity_id = ? FOR UPDATE")
        .bind(entity_id)
        .fetch_all(&mut *blocker)
        .await
        .unwrap();

    let fetched_at = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap();
    let result = repository
        .record_fetch(entity_id, fetched_at, Some(&snapshot_with_xp(100)))
        .await;
    blocker.rollback().await.unwrap();

    assert!(result.is_err());
    let entity = repository.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.last_fetched, None);
    assert_eq!(SnapshotCrud::new(db.clone()).count_for_entity(entity_id).await.unwrap(), 0);

    cleanup(&db, entity_id).await;
}
