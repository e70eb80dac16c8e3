pub(crate) use crate::config::cache::{CacheConfig, CacheStore};
pub(crate) use crate::config::breaker::BreakerConfig;
pub(crate) use crate::config::identity::IdentityConfig;
pub(crate) use crate::config::registry::RegistryConfig;
pub(crate) use crate::config::tokens::TokenConfig;
use confique::Config;

pub mod breaker;
pub mod cache;
pub mod identity;
pub mod registry;
pub mod tokens;

/// Main configuration structure for the capability token server
#[derive(Debug, Config, Clone)]
pub struct CapConfig {
    /// API key guarding the administrative endpoints (/revoke, /device/approve)
    #[config(env = "CAP_API_KEY", default = "")]
    pub api_key: String,

    /// The port the server will listen to
    #[config(env = "CAP_PORT", default = 7603)]
    pub port: u16,

    /// Public base URL, used to build device-flow verification URIs
    #[config(env = "CAP_PUBLIC_URL", default = "http://localhost:7603")]
    pub public_url: String,

    /// Store configuration
    #[config(nested)]
    pub cache: CacheConfig,

    /// Capability token configuration
    #[config(nested)]
    pub tokens: TokenConfig,

    /// External identity provider configuration
    #[config(nested)]
    pub identity: IdentityConfig,

    /// Mini-app registry configuration
    #[config(nested)]
    pub registry: RegistryConfig,

    /// Circuit breaker defaults
    #[config(nested)]
    pub breaker: BreakerConfig,
}

impl CapConfig {
    /// Loads configuration from the environment, falling back to
    /// `cap-server.toml` where present.
    pub fn load() -> Result<Self, String> {
        Self::builder()
            .env()
            .file("cap-server.toml")
            .load()
            .map_err(|e| e.to_string())
    }
}

impl Default for CapConfig {
    fn default() -> Self {
        Self {
            api_key: "".to_string(),
            port: 7603,
            public_url: "http://localhost:7603".to_string(),
            cache: CacheConfig::default(),
            tokens: TokenConfig::default(),
            identity: IdentityConfig::default(),
            registry: RegistryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CapConfig::default();
        assert_eq!(config.port, 7603);
        assert_eq!(config.cache.ttl, 3600);
        assert_eq!(config.cache.store, CacheStore::InMemory);
        assert_eq!(config.tokens.access_ttl, 3600);
        assert_eq!(config.tokens.code_ttl, 600);
        assert_eq!(config.tokens.auth_request_ttl, 900);
        assert_eq!(config.tokens.device_ttl, 900);
        assert_eq!(config.tokens.device_interval, 5);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, 60);
        assert_eq!(config.identity.timeout, 30);
        assert_eq!(config.registry.timeout, 30);
    }
}
