//! External identity provider client.
//!
//! Covers the introspection and revocation endpoints this service consumes:
//! form-encoded requests authenticated with client credentials, as OAuth
//! providers expect. All calls run through the `identity-provider` breaker.

use super::ClientError;
use crate::breaker::CircuitBreaker;
use crate::config::IdentityConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const DEPENDENCY: &str = "identity-provider";

/// Introspection result for an identity-provider session token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityIntrospection {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
}

#[derive(Clone)]
pub struct IdentityClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    breaker: Arc<CircuitBreaker>,
}

impl IdentityClient {
    pub fn new(config: &IdentityConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(2))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .expect("Failed to create identity provider client");

        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            breaker,
        }
    }

    /// Asks the identity provider whether a session token is active.
    pub async fn introspect(&self, token: &str) -> Result<IdentityIntrospection, ClientError> {
        let url = format!("{}/oauth2/introspect", self.base_url);
        let params = [
            ("token", token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        self.breaker
            .call(async {
                let response =
                    self.http.post(&url).form(&params).send().await.map_err(|source| {
                        ClientError::Request {
                            dependency: DEPENDENCY,
                            source,
                        }
                    })?;

                if !response.status().is_success() {
                    return Err(ClientError::Status {
                        dependency: DEPENDENCY,
                        status: response.status(),
                    });
                }

                response
                    .json::<IdentityIntrospection>()
                    .await
                    .map_err(|e| ClientError::Parse {
                        dependency: DEPENDENCY,
                        message: e.to_string(),
                    })
            })
            .await
            .map_err(ClientError::from_breaker)
    }

    /// Tells the identity provider to drop the grants it holds for a
    /// (user, client) pair. Used during revocation; best-effort at the call
    /// site, an error here never unwinds the local ledger write.
    pub async fn revoke_grants(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
    ) -> Result<(), ClientError> {
        let url = format!("{}/v1/grants/revoke", self.base_url);
        let body = json!({
            "user_id": user_id,
            "client_id": client_id,
            "scopes": scopes,
        });

        self.breaker
            .call(async {
                let response = self
                    .http
                    .post(&url)
                    .basic_auth(&self.client_id, Some(&self.client_secret))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|source| ClientError::Request {
                        dependency: DEPENDENCY,
                        source,
                    })?;

                if !response.status().is_success() {
                    return Err(ClientError::Status {
                        dependency: DEPENDENCY,
                        status: response.status(),
                    });
                }
                Ok(())
            })
            .await
            .map_err(ClientError::from_breaker)
    }
}
