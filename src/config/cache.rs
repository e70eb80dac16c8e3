use confique::Config;
use serde::Deserialize;

/// Specifies which store implementation to use
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStore {
    InMemory,
    Redis,
    None,
}

/// Configuration for the storage subsystem
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Default TTL in seconds for entries written without an explicit one
    #[config(env = "CAP_CACHE_TTL", default = 3600)]
    pub ttl: u32,

    /// Store type: "in-memory", "redis", or "none"
    #[config(env = "CAP_CACHE_STORE", default = "in-memory")]
    pub store: CacheStore,

    /// In-memory store specific configuration
    #[config(nested)]
    pub memory: InMemoryConfig,

    /// Redis store specific configuration
    #[config(nested)]
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: 3600,
            store: CacheStore::InMemory,
            memory: InMemoryConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

/// In-memory store configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum capacity in MiB
    #[config(env = "CAP_CACHE_MEMORY_CAPACITY", default = 128)]
    pub capacity: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

/// Redis store configuration options
#[derive(Debug, Config, Clone)]
pub struct RedisConfig {
    /// Redis connection string
    #[config(env = "CAP_CACHE_REDIS_URL", default = "")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: "".to_string() }
    }
}
