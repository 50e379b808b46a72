//! Process-local cache backend.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CacheBackend, CacheEntry, KEY_PREFIX};
use crate::error::RelayError;

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (CacheEntry, Instant)>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RelayError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        Ok(entries.get(key).map(|(entry, _)| entry.clone()))
    }

    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), RelayError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (entry.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn clear(&self) -> Result<usize, RelayError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(KEY_PREFIX));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn entry(body: &str) -> CacheEntry {
        CacheEntry::new(200, BTreeMap::new(), body.into())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .put("cache:GET:/m?", &entry("models"), Duration::from_secs(300))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("cache:GET:/m?").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("cache:GET:/m?").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_prefixed_keys_only() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put("cache:GET:/a?", &entry("a"), ttl).await.unwrap();
        cache.put("cache:GET:/b?", &entry("b"), ttl).await.unwrap();
        cache.put("session:1", &entry("s"), ttl).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.get("cache:GET:/a?").await.unwrap().is_none());
        assert!(cache.get("session:1").await.unwrap().is_some());
    }
}
