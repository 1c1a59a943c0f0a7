//! In-memory cache implementation using moka
//!
//! Uses moka's TinyLFU cache with per-entry TTLs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::backend::CacheBackend;
use super::error::CacheError;
use crate::core::config::CacheConfig;

/// Cache entry with data and its TTL
#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
}

/// Per-entry expiry tracking for variable TTLs
struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_read(
        &self,
        _key: &String,
        _value: &CacheEntry,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        duration_until_expiry
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .initial_capacity((config.max_entries as usize / 4).min(10_000))
            .expire_after(VariableTtlExpiry)
            .build();

        Self { cache }
    }

    /// Translate a glob pattern (`*` wildcard only) into a matcher
    fn glob_matches(pattern: &str, key: &str) -> bool {
        if !pattern.contains('*') {
            return pattern == key;
        }
        let mut segments = pattern.split('*');
        let first = segments.next().unwrap_or_default();
        if !key.starts_with(first) {
            return false;
        }
        let mut pos = first.len();
        let mut rest: Vec<&str> = segments.collect();
        let last = if pattern.ends_with('*') {
            None
        } else {
            rest.pop()
        };
        for seg in rest {
            if seg.is_empty() {
                continue;
            }
            match key[pos..].find(seg) {
                Some(idx) => pos += idx + seg.len(),
                None => return false,
            }
        }
        match last {
            Some(seg) => key.len() >= pos + seg.len() && key.ends_with(seg),
            None => true,
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.data.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry { data: value, ttl };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.cache.get(key).await.map(|entry| entry.data.clone()));
        }
        Ok(out)
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.cache.insert(key, CacheEntry { data: value, ttl }).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let pattern = pattern.to_string();
        let mut count = 0u64;
        // moka iteration is weakly consistent, which matches the
        // best-effort contract of pattern invalidation
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| Self::glob_matches(&pattern, k))
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in keys {
            self.cache.invalidate(&key).await;
            count += 1;
        }
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheBackendType;

    fn test_cache() -> InMemoryCache {
        InMemoryCache::new(&CacheConfig {
            backend: CacheBackendType::Memory,
            redis_url: None,
            max_entries: 1000,
        })
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = test_cache();
        cache.set("k1", b"v1".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(b"v1".to_vec()));
        assert!(cache.delete("k1").await.unwrap());
        assert_eq!(cache.get("k1").await.unwrap(), None);
        assert!(!cache.delete("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = test_cache();
        cache
            .set("short", b"x".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_alignment() {
        let cache = test_cache();
        cache.set("a", b"1".to_vec(), None).await.unwrap();
        cache.set("c", b"3".to_vec(), None).await.unwrap();
        let result = cache
            .get_many(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(result[0], Some(b"1".to_vec()));
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = test_cache();
        cache.set("v1:agg:p1", b"1".to_vec(), None).await.unwrap();
        cache.set("v1:agg:p2", b"2".to_vec(), None).await.unwrap();
        cache.set("v1:labels:s1", b"3".to_vec(), None).await.unwrap();

        // moka's iterator is eventually consistent; sync before scanning
        cache.cache.run_pending_tasks().await;

        let deleted = cache.delete_pattern("v1:agg:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.get("v1:agg:p1").await.unwrap().is_none());
        assert!(cache.get("v1:labels:s1").await.unwrap().is_some());
    }

    #[test]
    fn test_glob_matches() {
        assert!(InMemoryCache::glob_matches("v1:agg:*", "v1:agg:post"));
        assert!(!InMemoryCache::glob_matches("v1:agg:*", "v1:labels:x"));
        assert!(InMemoryCache::glob_matches(
            "v1:viewer:*:post",
            "v1:viewer:did:plc:v:post"
        ));
        assert!(!InMemoryCache::glob_matches(
            "v1:viewer:*:post",
            "v1:viewer:did:plc:v:other"
        ));
        assert!(InMemoryCache::glob_matches("exact", "exact"));
        assert!(!InMemoryCache::glob_matches("exact", "exact-no"));
    }
}
