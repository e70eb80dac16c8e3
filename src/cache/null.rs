use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// NullCache is a store implementation that does nothing.
///
/// With it configured, every flow artifact evaporates on write: pending
/// authorization requests are never found again and one-time claims always
/// succeed. It exists so components that only need the interface can run
/// without a store; a real deployment needs the in-memory or Redis backend.
#[derive(Clone, Debug)]
pub struct NullCache;

impl NullCache {
    /// Create a new NullCache instance
    pub fn new() -> Self {
        NullCache
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
    ) -> Result<(), CacheError> {
        // Do nothing
        Ok(())
    }

    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
        _ttl_secs: u64,
    ) -> Result<(), CacheError> {
        // Do nothing
        Ok(())
    }

    async fn set_nx<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
        _ttl_secs: u64,
    ) -> Result<bool, CacheError> {
        // Nothing is ever present, so every claim succeeds
        Ok(true)
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        _key: &str,
    ) -> Result<Option<T>, CacheError> {
        // Always return None
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        // Do nothing
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        // NullCache is always healthy as it doesn't interact with any external systems
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        field: String,
    }

    #[tokio::test]
    async fn test_null_cache_operations() {
        let cache = NullCache::new();

        let data = TestData {
            field: "test".to_string(),
        };

        // Test set (should do nothing)
        assert!(cache.set("test_key", &data).await.is_ok());

        // Test get (should always return None)
        let result: Option<TestData> = cache.get("test_key").await.unwrap();
        assert!(result.is_none());

        // Claims always succeed
        assert!(cache.set_nx("test_key", &data, 60).await.unwrap());

        // Test delete (should do nothing)
        assert!(cache.delete("test_key").await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check() {
        let cache = NullCache::new();
        let result = cache.health_check().await;
        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
