//! Signed webhook plumbing, both directions.
//!
//! Outbound notifications to mini-apps and inbound events from the identity
//! provider share one envelope: the body is signed with HMAC-SHA256 over
//! `"{timestamp}.{body}"`, the hex signature and the timestamp travel in
//! headers, receivers reject skew beyond ±300 s and deduplicate by
//! idempotency key for 24 hours.

use crate::breaker::BreakerRegistry;
use crate::cache::{Cache, CacheBackend, CacheError};
use crate::clients::registry::RegisteredApp;
use crate::clients::ClientError;
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use ring::hmac;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-cap-signature";
pub const TIMESTAMP_HEADER: &str = "x-cap-timestamp";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Maximum accepted clock skew between sender and receiver.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// How long an idempotency key stays claimed.
pub const IDEMPOTENCY_TTL_SECS: u64 = 86400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("missing timestamp header")]
    MissingTimestamp,
    #[error("invalid timestamp format")]
    InvalidTimestamp,
    #[error("webhook timestamp is too old")]
    ExpiredTimestamp,
    #[error("webhook timestamp is in the future")]
    FutureTimestamp,
    #[error("webhook signature verification failed")]
    Mismatch,
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// HMAC-SHA256 over `"{timestamp}.{body}"`, hex-encoded.
pub fn compute_signature(secret: &str, timestamp: i64, body: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, format!("{timestamp}.{body}").as_bytes());
    hex_encode(tag.as_ref())
}

/// Verifies an incoming webhook's timestamp window and signature.
///
/// The signature check is constant-time; every failure kind is distinguished
/// internally for logging but callers should collapse them externally.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if timestamp.is_empty() {
        return Err(SignatureError::MissingTimestamp);
    }
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;

    let age = Utc::now().timestamp() - ts;
    if age > MAX_TIMESTAMP_SKEW_SECS {
        return Err(SignatureError::ExpiredTimestamp);
    }
    if age < -MAX_TIMESTAMP_SKEW_SECS {
        return Err(SignatureError::FutureTimestamp);
    }

    let provided = hex_decode(signature).ok_or(SignatureError::Mismatch)?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, format!("{ts}.{body}").as_bytes(), &provided)
        .map_err(|_| SignatureError::Mismatch)
}

fn idempotency_key(key: &str) -> String {
    format!("webhook_idem:{key}")
}

fn idempotency_response_key(key: &str) -> String {
    format!("webhook_idem:{key}:response")
}

/// Atomically claims an idempotency key. Returns false when some earlier
/// delivery already claimed it.
pub async fn claim_idempotency(cache: &Cache, key: &str) -> Result<bool, CacheError> {
    cache
        .set_nx(&idempotency_key(key), &true, IDEMPOTENCY_TTL_SECS)
        .await
}

/// Stores the response produced for a claimed key so duplicates can replay it.
pub async fn store_idempotent_response(
    cache: &Cache,
    key: &str,
    response: &serde_json::Value,
) -> Result<(), CacheError> {
    cache
        .set_with_ttl(&idempotency_response_key(key), response, IDEMPOTENCY_TTL_SECS)
        .await
}

/// The response recorded for a previously-claimed key, if processing has
/// finished.
pub async fn load_idempotent_response(
    cache: &Cache,
    key: &str,
) -> Result<Option<serde_json::Value>, CacheError> {
    cache.get(&idempotency_response_key(key)).await
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("mini-app has no webhook endpoint registered")]
    NoEndpoint,
    #[error("mini-app has no webhook secret registered")]
    NoSecret,
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to serialize webhook payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivers signed webhook notifications to mini-apps.
///
/// Each destination gets its own breaker (`webhook:{client_id}`) so one dead
/// endpoint cannot block notifications to the rest. Delivery is best-effort:
/// failures are logged by callers, never retried automatically.
#[derive(Clone)]
pub struct WebhookDispatcher {
    http: Client,
    breakers: Arc<BreakerRegistry>,
}

impl WebhookDispatcher {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .expect("Failed to create webhook client");
        Self { http, breakers }
    }

    pub async fn dispatch(
        &self,
        app: &RegisteredApp,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let url = app.webhook_url.as_deref().ok_or(DispatchError::NoEndpoint)?;
        let secret = app.webhook_secret.as_deref().ok_or(DispatchError::NoSecret)?;

        // The exact signed bytes are sent, not a re-serialization.
        let body = serde_json::to_string(payload)?;
        let timestamp = Utc::now().timestamp();
        let signature = compute_signature(secret, timestamp, &body);

        let dependency = format!("webhook:{}", app.client_id);
        let breaker = self.breakers.get(&dependency);

        let result = breaker
            .call(async {
                let response = self
                    .http
                    .post(url)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .header(TIMESTAMP_HEADER, timestamp.to_string())
                    .header(SIGNATURE_HEADER, &signature)
                    .body(body)
                    .send()
                    .await
                    .map_err(|source| ClientError::Request {
                        dependency: "webhook",
                        source,
                    })?;

                if !response.status().is_success() {
                    return Err(ClientError::Status {
                        dependency: "webhook",
                        status: response.status(),
                    });
                }
                Ok(())
            })
            .await
            .map_err(ClientError::from_breaker);

        match result {
            Ok(()) => {
                debug!("delivered webhook to '{}'", app.client_id);
                Ok(())
            }
            Err(err) => {
                warn!("webhook delivery to '{}' failed: {}", app.client_id, err);
                Err(DispatchError::Client(err))
            }
        }
    }
}
