use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::services::scheduler::{ScheduleStore, StoreError};

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Thin async Redis wrapper.
///
/// The multiplexed connection is opened lazily and shared by clones of the
/// same service; `close` drops it and the next call reconnects.
#[derive(Clone)]
pub struct RedisService {
    client: Client,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisService {
    pub fn new(redis_url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(redis_url)?,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    pub async fn disconnect(&self) {
        self.connection.lock().await.take();
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    pub async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    /// Acquire a lock key holding `token` for `ttl`; false when someone else holds it
    pub async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RedisError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    /// Release a lock only if it still holds our token
    pub async fn release_lock(&self, key: &str, token: &str) -> Result<bool, RedisError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted > 0)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl ScheduleStore for RedisService {
    async fn connect(&self) -> Result<(), StoreError> {
        self.connection().await?;
        Ok(())
    }

    async fn close(&self) {
        self.disconnect().await;
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_value(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        Ok(self.set_value(key, value, ttl).await?)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.try_lock(key, value, ttl).await?)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        Ok(self.release_lock(key, value).await?)
    }
}
