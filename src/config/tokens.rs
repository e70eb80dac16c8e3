//! Capability token and flow-artifact lifetimes.

use confique::Config;

#[derive(Debug, Config, Clone)]
pub struct TokenConfig {
    /// Issuer identifier stamped into every capability token
    #[config(env = "CAP_TOKENS_ISSUER", default = "https://cap.example.com")]
    pub issuer: String,

    /// Key id of the active signing key
    #[config(env = "CAP_TOKENS_KEY_ID", default = "cap-2026-01")]
    pub key_id: String,

    /// Base64-encoded Ed25519 PKCS#8 signing key.
    /// When unset an ephemeral key is generated; tokens then die with the
    /// process, so this is only acceptable for development.
    #[config(env = "CAP_TOKENS_SIGNING_KEY")]
    pub signing_key: Option<String>,

    /// Access token TTL in seconds (default: 1 hour)
    #[config(env = "CAP_TOKENS_ACCESS_TTL", default = 3600)]
    pub access_ttl: u64,

    /// Authorization code TTL in seconds (default: 10 minutes)
    #[config(env = "CAP_TOKENS_CODE_TTL", default = 600)]
    pub code_ttl: u64,

    /// Pending authorization request TTL in seconds (default: 15 minutes)
    #[config(env = "CAP_TOKENS_AUTH_REQUEST_TTL", default = 900)]
    pub auth_request_ttl: u64,

    /// Refresh token TTL in seconds (default: 30 days)
    #[config(env = "CAP_TOKENS_REFRESH_TTL", default = 2592000)]
    pub refresh_ttl: u64,

    /// Device authorization TTL in seconds
    #[config(env = "CAP_TOKENS_DEVICE_TTL", default = 900)]
    pub device_ttl: u64,

    /// Minimum device poll interval in seconds
    #[config(env = "CAP_TOKENS_DEVICE_INTERVAL", default = 5)]
    pub device_interval: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "https://cap.example.com".to_string(),
            key_id: "cap-2026-01".to_string(),
            signing_key: None,
            access_ttl: 3600,
            code_ttl: 600,
            auth_request_ttl: 900,
            refresh_ttl: 2592000,
            device_ttl: 900,
            device_interval: 5,
        }
    }
}
