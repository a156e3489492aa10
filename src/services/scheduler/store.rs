use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Shared key-value store the schedulers coordinate through.
///
/// Every method must be atomic on the store side; schedulers in different
/// processes rely on that and on nothing else.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn connect(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) {}

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// `SET key value NX PX ttl`; true when this call created the key
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only while it still holds `value`
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;
}
