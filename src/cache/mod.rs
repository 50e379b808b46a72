//! Time-bounded cache of complete successful responses.
//!
//! Only `GET` requests to non-streaming paths are cacheable. Keys carry
//! the method, path, and query (minus the `key` credential parameter)
//! under a shared prefix so the whole cache can be cleared at once.
//! Backend failures are logged and treated as misses; the cache never
//! fails a request.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_cache;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::proxy::headers::strip_transport_headers;

pub const KEY_PREFIX: &str = "cache:";

/// Marker header on responses served from cache.
pub const HIT_HEADER: &str = "x-proxy-cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl CacheEntry {
    /// Snapshot of a finished response with transport headers removed.
    #[must_use]
    pub fn new(status: u16, mut headers: BTreeMap<String, String>, body: String) -> Self {
        strip_transport_headers(&mut headers);
        Self {
            status,
            headers,
            body,
        }
    }

    /// Headers for replaying this entry: stored headers plus the hit marker.
    #[must_use]
    pub fn replay_headers(&self, ttl: Duration) -> HeaderMap {
        let mut map = crate::proxy::headers::to_header_map(&self.headers);
        map.insert(HIT_HEADER, HeaderValue::from_static("HIT"));
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", ttl.as_secs())) {
            map.insert(http::header::CACHE_CONTROL, value);
        }
        if !map.contains_key(http::header::CONTENT_TYPE) {
            map.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        map
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RelayError>;
    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), RelayError>;
    /// Remove every key under [`KEY_PREFIX`], returning how many were removed.
    async fn clear(&self) -> Result<usize, RelayError>;
}

/// `GET` on a path that is not a streaming endpoint.
#[must_use]
pub fn is_cacheable(method: &Method, path: &str) -> bool {
    method == Method::GET && !crate::proxy::sse::is_streaming_path(path)
}

/// `cache:{METHOD}:{path}?{query}`, with the `key` parameter never included.
#[must_use]
pub fn cache_key(method: &Method, path: &str, query: &BTreeMap<String, String>) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter().filter(|(k, _)| k.as_str() != "key"))
        .finish();
    format!("{KEY_PREFIX}{method}:{path}?{query}")
}

pub struct ResponseCache {
    backend: Box<dyn CacheBackend>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.backend.get(key).await {
            Ok(Some(entry)) => {
                tracing::info!(key = %key, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a 2xx entry. Anything else is ignored.
    pub async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        if !(200..300).contains(&entry.status) || ttl.is_zero() {
            return;
        }
        match self.backend.put(key, entry, ttl).await {
            Ok(()) => tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "response cached"),
            Err(e) => tracing::warn!(key = %key, error = %e, "cache write failed"),
        }
    }

    pub async fn clear(&self) -> Result<usize, RelayError> {
        let cleared = self.backend.clear().await?;
        tracing::info!(cleared, backend = self.backend.name(), "cache cleared");
        Ok(cleared)
    }
}
