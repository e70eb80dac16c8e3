//! External identity provider configuration.

use confique::Config;

#[derive(Debug, Config, Clone)]
pub struct IdentityConfig {
    /// Identity provider base URL
    #[config(env = "CAP_IDENTITY_URL", default = "https://idp.example.com")]
    pub url: String,

    /// Client id used for server-to-server calls
    #[config(env = "CAP_IDENTITY_CLIENT_ID", default = "")]
    pub client_id: String,

    /// Client secret used for server-to-server calls
    #[config(env = "CAP_IDENTITY_CLIENT_SECRET", default = "")]
    pub client_secret: String,

    /// Shared secret for webhooks the identity provider sends us
    #[config(env = "CAP_IDENTITY_WEBHOOK_SECRET", default = "")]
    pub webhook_secret: String,

    /// Request timeout in seconds
    #[config(env = "CAP_IDENTITY_TIMEOUT", default = 30)]
    pub timeout: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: "https://idp.example.com".to_string(),
            client_id: "".to_string(),
            client_secret: "".to_string(),
            webhook_secret: "".to_string(),
            timeout: 30,
        }
    }
}
