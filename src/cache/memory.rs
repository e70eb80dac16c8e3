use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};

/// A cached value plus its own TTL, where one was requested.
#[derive(Clone)]
struct StoredEntry {
    payload: String,
    ttl: Option<Duration>,
}

/// Expiry policy: per-entry TTL when set, the cache default otherwise.
struct PerEntryExpiry {
    default_ttl: Duration,
}

impl Expiry<String, StoredEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl.unwrap_or(self.default_ttl))
    }
}

#[derive(Clone)]
pub struct InMemoryCache {
    cache: MokaCache<String, StoredEntry>,
    _ttl_secs: u64,
}

impl InMemoryCache {
    /// Initialize a new in-memory cache instance
    pub fn new(ttl_secs: u64, capacity_mib: usize) -> Result<Self, String> {
        // Convert MiB to bytes for max_capacity (1 MiB = 1024 * 1024 bytes)
        let max_capacity_bytes: u64 = (capacity_mib * 1024 * 1024)
            .try_into()
            .expect("Capacity overflow");

        let cache = MokaCache::builder()
            .expire_after(PerEntryExpiry {
                default_ttl: Duration::from_secs(ttl_secs),
            })
            .weigher(|_key, value: &StoredEntry| -> u32 {
                value.payload.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_capacity_bytes)
            .build();

        Ok(Self {
            cache,
            _ttl_secs: ttl_secs,
        })
    }

    async fn insert(&self, key: &str, payload: String, ttl: Option<Duration>) {
        self.cache
            .insert(key.to_string(), StoredEntry { payload, ttl })
            .await;
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        self.insert(key, serialized, None).await;
        Ok(())
    }

    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        self.insert(key, serialized, Some(Duration::from_secs(ttl_secs)))
            .await;
        Ok(())
    }

    async fn set_nx<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<bool, CacheError> {
        let serialized = serde_json::to_string(value)?;
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert(StoredEntry {
                payload: serialized,
                ttl: Some(Duration::from_secs(ttl_secs)),
            })
            .await;
        Ok(entry.is_fresh())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        if let Some(entry) = self.cache.get(key).await {
            serde_json::from_str(&entry.payload)
                .map_err(|e| CacheError::Deserialization(e.to_string()))
                .map(Some)
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.remove(key).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
