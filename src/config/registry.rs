//! Mini-app registry configuration.

use confique::Config;

#[derive(Debug, Config, Clone)]
pub struct RegistryConfig {
    /// Registry base URL
    #[config(env = "CAP_REGISTRY_URL", default = "https://registry.example.com")]
    pub url: String,

    /// API key presented to the registry
    #[config(env = "CAP_REGISTRY_API_KEY", default = "")]
    pub api_key: String,

    /// Request timeout in seconds
    #[config(env = "CAP_REGISTRY_TIMEOUT", default = 30)]
    pub timeout: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "https://registry.example.com".to_string(),
            api_key: "".to_string(),
            timeout: 30,
        }
    }
}
