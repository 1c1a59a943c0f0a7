//! Cache module
//!
//! TTL-bounded key/value cache in front of the index store, with pluggable
//! backends:
//! - In-memory (default) - uses moka
//! - Redis (optional) - uses deadpool-redis
//!
//! Every public operation degrades silently when the cache store is
//! unavailable; reads fall through to the index and writes are dropped with
//! a warning. The system stays correct without the cache.

mod backend;
mod error;
mod key;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::{
    CacheKey, TTL_LABELS, TTL_MUTES_BLOCKS, TTL_POST_AGGREGATES, TTL_THREAD_CONTEXT,
    TTL_VIEWER_STATE,
};

use memory::InMemoryCache;

use crate::core::config::{CacheBackendType, CacheConfig};

/// Cache service providing typed access to the cache backend
///
/// Values are serialized with MessagePack. All operations are best-effort:
/// backend failures are logged and swallowed so callers never need an error
/// path for the cache.
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    /// Create a new cache service from configuration
    pub async fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!(
                    max_entries = config.max_entries,
                    "Initializing in-memory cache"
                );
                Arc::new(InMemoryCache::new(config))
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    CacheError::Config("redis_url required for Redis backend".into())
                })?;
                Arc::new(redis::RedisCache::new(url).await?)
            }
        };

        Ok(Self { backend })
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Get a typed value from cache
    pub async fn get<T: DeserializeOwned>(&self, cache_key: &str) -> Option<T> {
        match self.backend.get(cache_key).await {
            Ok(Some(bytes)) => match rmp_serde::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "Cache entry failed to decode");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Set a typed value in cache with a TTL
    pub async fn set<T: Serialize>(&self, cache_key: &str, value: &T, ttl: Duration) {
        let bytes = match rmp_serde::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "Cache value failed to encode");
                return;
            }
        };
        if let Err(e) = self.backend.set(cache_key, bytes, Some(ttl)).await {
            tracing::warn!(key = %cache_key, error = %e, "Cache set failed");
        }
    }

    /// Get many typed values; the result is positionally aligned with `keys`
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        match self.backend.get_many(keys).await {
            Ok(values) => values
                .into_iter()
                .map(|maybe| maybe.and_then(|bytes| rmp_serde::from_slice(&bytes).ok()))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, count = keys.len(), "Cache get_many failed");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    /// Set many typed values with a shared TTL
    pub async fn set_many<T: Serialize>(&self, entries: &[(String, T)], ttl: Duration) {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match rmp_serde::to_vec(value) {
                Ok(bytes) => encoded.push((key.clone(), bytes)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache value failed to encode");
                }
            }
        }
        if let Err(e) = self.backend.set_many(encoded, Some(ttl)).await {
            tracing::warn!(error = %e, "Cache set_many failed");
        }
    }

    /// Delete a single key
    pub async fn delete(&self, cache_key: &str) {
        if let Err(e) = self.backend.delete(cache_key).await {
            tracing::warn!(key = %cache_key, error = %e, "Cache invalidation failed");
        }
    }

    /// Invalidate keys matching a glob pattern.
    ///
    /// Scans incrementally in bounded batches; returns the number of keys
    /// removed (0 when the backend is unavailable).
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        match self.backend.delete_pattern(pattern).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Cache pattern invalidation failed");
                0
            }
        }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig {
            backend: CacheBackendType::Memory,
            redis_url: None,
            max_entries: 1000,
        }
    }

    #[tokio::test]
    async fn test_cache_service_backend_name() {
        let service = CacheService::new(&test_config()).await.unwrap();
        assert_eq!(service.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_typed_get_set() {
        let service = CacheService::new(&test_config()).await.unwrap();

        #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
        struct Aggregates {
            likes: i64,
            reposts: i64,
        }

        let agg = Aggregates {
            likes: 3,
            reposts: 1,
        };

        service
            .set(&CacheKey::post_aggregates("at://a/b/c"), &agg, TTL_POST_AGGREGATES)
            .await;
        let fetched: Option<Aggregates> =
            service.get(&CacheKey::post_aggregates("at://a/b/c")).await;
        assert_eq!(fetched, Some(agg));
    }

    #[tokio::test]
    async fn test_get_many_aligned_with_keys() {
        let service = CacheService::new(&test_config()).await.unwrap();
        service.set("k1", &1i64, Duration::from_secs(60)).await;
        service.set("k3", &3i64, Duration::from_secs(60)).await;

        let values: Vec<Option<i64>> = service
            .get_many(&["k1".into(), "k2".into(), "k3".into()])
            .await;
        assert_eq!(values, vec![Some(1), None, Some(3)]);
    }

    #[tokio::test]
    async fn test_delete_is_silent_on_missing_key() {
        let service = CacheService::new(&test_config()).await.unwrap();
        service.delete("never-set").await;
    }
}
