use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod null;
pub mod redis;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Cache trait defining the interface for all store implementations.
///
/// The store is the durability layer for every mutable record in the flows:
/// pending authorization requests, one-time codes, device authorizations,
/// refresh tokens, scope grants, the revocation ledger, and idempotency
/// markers. Implementations must be thread-safe (Send + Sync) and cloneable
/// so handlers can share them.
///
/// `set_nx` is the atomic check-and-set primitive: one-time artifacts are
/// claimed through it rather than a read-then-write pair, closing the race
/// where two concurrent identical requests both observe "not present".
/// Store-level TTL eviction may lag logical expiry, so records also carry
/// timestamps checked at use time.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value with the backend's default TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), CacheError>;

    /// Store a value with an explicit TTL in seconds
    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError>;

    /// Atomically store a value only if the key is absent.
    ///
    /// Returns true when this call created the entry, false when the key
    /// already existed.
    async fn set_nx<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<bool, CacheError>;

    /// Retrieve a value from the cache
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Performs a deep health check on the cache backend.
    ///
    /// For Redis this pings the server; for the in-memory store it checks
    /// the cache is initialized. Returns Ok(()) if healthy, or Err with a
    /// descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Cache implementation that provides a uniform interface regardless of
/// backend.
///
/// The concrete implementation is chosen at runtime from configuration;
/// handlers only ever see this enum.
#[derive(Clone)]
pub enum Cache {
    /// In-memory store backed by Moka
    InMemory(memory::InMemoryCache),
    /// Redis-backed store
    Redis(redis::RedisCache),
    /// No-op store that doesn't persist anything
    Null(null::NullCache),
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set(key, value).await,
            Self::Redis(cache) => cache.set(key, value).await,
            Self::Null(cache) => cache.set(key, value).await,
        }
    }

    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set_with_ttl(key, value, ttl_secs).await,
            Self::Redis(cache) => cache.set_with_ttl(key, value, ttl_secs).await,
            Self::Null(cache) => cache.set_with_ttl(key, value, ttl_secs).await,
        }
    }

    async fn set_nx<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<bool, CacheError> {
        match self {
            Self::InMemory(cache) => cache.set_nx(key, value, ttl_secs).await,
            Self::Redis(cache) => cache.set_nx(key, value, ttl_secs).await,
            Self::Null(cache) => cache.set_nx(key, value, ttl_secs).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self {
            Self::InMemory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
            Self::Null(cache) => cache.get(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.delete(key).await,
            Self::Redis(cache) => cache.delete(key).await,
            Self::Null(cache) => cache.delete(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(cache) => cache.health_check().await,
            Self::Redis(cache) => cache.health_check().await,
            Self::Null(cache) => cache.health_check().await,
        }
    }
}

/// Factory function creating the cache implementation selected by
/// configuration.
pub async fn create_cache(config: &crate::config::CacheConfig) -> Result<Cache, CacheError> {
    match config.store {
        crate::config::CacheStore::InMemory => {
            let cache = memory::InMemoryCache::new(config.ttl as u64, config.memory.capacity)
                .map_err(CacheError::Config)?;
            Ok(Cache::InMemory(cache))
        }
        crate::config::CacheStore::Redis => {
            if config.redis.url.is_empty() {
                return Err(CacheError::Config(
                    "Redis URL is required for Redis cache".to_string(),
                ));
            }
            let cache = redis::RedisCache::new(&config.redis.url, config.ttl as u64)
                .await
                .map_err(CacheError::Config)?;
            Ok(Cache::Redis(cache))
        }
        crate::config::CacheStore::None => {
            let cache = null::NullCache::new();
            Ok(Cache::Null(cache))
        }
    }
}
