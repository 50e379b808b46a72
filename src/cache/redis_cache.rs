//! Redis cache backend.
//!
//! Entries are stored as JSON strings with `SET .. EX` so Redis handles
//! expiry. Clearing scans for the shared key prefix.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{CacheBackend, CacheEntry, KEY_PREFIX};
use crate::error::RelayError;

fn redis_err(e: impl std::error::Error + Send + Sync + 'static) -> RelayError {
    RelayError::Cache {
        backend: "redis",
        source: Box::new(e),
    }
}

pub struct RedisCache {
    conn: Mutex<redis::aio::MultiplexedConnection>,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url).map_err(redis_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        tracing::info!("connected to redis cache");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RelayError> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = conn.get(key).await.map_err(redis_err)?;
        drop(conn);
        raw.map(|json| serde_json::from_str(&json).map_err(redis_err))
            .transpose()
    }

    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), RelayError> {
        let json = serde_json::to_string(entry).map_err(redis_err)?;
        let mut conn = self.conn.lock().await;
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await
            .map_err(redis_err)
    }

    async fn clear(&self) -> Result<usize, RelayError> {
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = conn
            .keys(format!("{KEY_PREFIX}*"))
            .await
            .map_err(redis_err)?;
        if keys.is_empty() {
            return Ok(0);
        }
        conn.del::<_, usize>(keys).await.map_err(redis_err)
    }
}
