//! Mini-app registry client.
//!
//! The registry is the source of truth for which scopes a client registered
//! in its manifest, whether it is active, and where its webhook endpoint
//! lives. All lookups go through the `miniapp-registry` breaker.

use super::ClientError;
use crate::breaker::CircuitBreaker;
use crate::config::RegistryConfig;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEPENDENCY: &str = "miniapp-registry";

/// A mini-app as the registry knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredApp {
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub verified: bool,
    /// The scope manifest the developer registered; requests outside it are
    /// escalation attempts.
    #[serde(default)]
    pub registered_scopes: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Clone)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                format!("Bearer {}", config.api_key)
                    .parse()
                    .expect("Failed to parse registry API key"),
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .expect("Failed to create registry client");

        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            breaker,
        }
    }

    /// Looks up a mini-app by client id. Unknown clients are `None`, not an
    /// error; only transport and server failures count against the breaker.
    pub async fn fetch_app(&self, client_id: &str) -> Result<Option<RegisteredApp>, ClientError> {
        let url = format!("{}/v1/clients/{}", self.base_url, client_id);

        self.breaker
            .call(async {
                let response = self.http.get(&url).send().await.map_err(|source| {
                    ClientError::Request {
                        dependency: DEPENDENCY,
                        source,
                    }
                })?;

                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(ClientError::Status {
                        dependency: DEPENDENCY,
                        status: response.status(),
                    });
                }

                response
                    .json::<RegisteredApp>()
                    .await
                    .map(Some)
                    .map_err(|e| ClientError::Parse {
                        dependency: DEPENDENCY,
                        message: e.to_string(),
                    })
            })
            .await
            .map_err(ClientError::from_breaker)
    }
}
