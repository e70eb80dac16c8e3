//! Storage for authorization-code flow artifacts: pending authorization
//! requests, one-time codes and refresh tokens.
//!
//! Every one-time artifact is consumed through an atomic claim marker
//! (`set_nx`) before its record is read and deleted, so two concurrent
//! redemptions can never both succeed. Records carry their own expiry and
//! are checked at use time as well, since store eviction may lag.

use crate::cache::{Cache, CacheBackend, CacheError};
use crate::revocation::refresh_cutoff_key;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use ring::{constant_time, digest};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A pending authorization request awaiting the user's decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuthRequest {
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: String,
    pub code_challenge: String,
    pub client_name: String,
    pub created_at: u64,
    pub expires_at: u64,
}

/// A one-time authorization code bound to a consented request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuthCode {
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub wallet_id: Option<String>,
    pub scopes: Vec<String>,
    pub state: String,
    pub code_challenge: String,
    pub created_at: u64,
    pub expires_at: u64,
}

/// A refresh token record; rotated (single use) on every grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRefreshToken {
    pub user_id: String,
    pub wallet_id: Option<String>,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Result of consuming a one-time artifact.
pub enum Consumed<T> {
    /// First redemption; the artifact is now spent.
    Fresh(T),
    /// Someone already redeemed it.
    Replayed,
    /// Unknown, expired, or revoked out from under us.
    Missing,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate an opaque, unguessable artifact: 32 random bytes, base64url.
pub fn generate_opaque_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// PKCE S256: `Base64Url(SHA256(verifier))`.
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Constant-time comparison of the derived challenge against the stored one.
pub fn pkce_matches(challenge: &str, verifier: &str) -> bool {
    let derived = pkce_challenge(verifier);
    constant_time::verify_slices_are_equal(derived.as_bytes(), challenge.as_bytes()).is_ok()
}

#[derive(Clone)]
pub struct AuthFlowStore {
    cache: Arc<Cache>,
    auth_request_ttl: u64,
    code_ttl: u64,
    refresh_ttl: u64,
}

impl AuthFlowStore {
    pub fn new(cache: Arc<Cache>, auth_request_ttl: u64, code_ttl: u64, refresh_ttl: u64) -> Self {
        Self {
            cache,
            auth_request_ttl,
            code_ttl,
            refresh_ttl,
        }
    }

    pub fn auth_request_ttl(&self) -> u64 {
        self.auth_request_ttl
    }

    /// Persists a new authorization request and returns its id.
    pub async fn put_auth_request(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scopes: Vec<String>,
        state: &str,
        code_challenge: &str,
        client_name: &str,
    ) -> Result<StoredAuthRequest, CacheError> {
        let now = unix_now();
        let request = StoredAuthRequest {
            id: generate_opaque_token(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes,
            state: state.to_string(),
            code_challenge: code_challenge.to_string(),
            client_name: client_name.to_string(),
            created_at: now,
            expires_at: now + self.auth_request_ttl,
        };
        // Store TTL trails logical expiry; the timestamp check at use time
        // is authoritative, the store only garbage-collects.
        self.cache
            .set_with_ttl(
                &format!("auth_request:{}", request.id),
                &request,
                self.auth_request_ttl + 60,
            )
            .await?;
        Ok(request)
    }

    /// Consumes an authorization request: single use across both the
    /// approval and denial paths.
    pub async fn consume_auth_request(
        &self,
        id: &str,
    ) -> Result<Consumed<StoredAuthRequest>, CacheError> {
        self.consume(
            &format!("auth_request:{id}"),
            &format!("auth_request_claim:{id}"),
            self.auth_request_ttl,
        )
        .await
    }

    /// Mints a one-time authorization code bound to a consented request.
    pub async fn issue_code(
        &self,
        request: &StoredAuthRequest,
        user_id: &str,
        wallet_id: Option<&str>,
    ) -> Result<String, CacheError> {
        let code = generate_opaque_token();
        let now = unix_now();
        let record = StoredAuthCode {
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            user_id: user_id.to_string(),
            wallet_id: wallet_id.map(str::to_string),
            scopes: request.scopes.clone(),
            state: request.state.clone(),
            code_challenge: request.code_challenge.clone(),
            created_at: now,
            expires_at: now + self.code_ttl,
        };
        self.cache
            .set_with_ttl(&format!("auth_code:{code}"), &record, self.code_ttl + 60)
            .await?;
        Ok(code)
    }

    /// Redeems an authorization code exactly once.
    pub async fn consume_code(&self, code: &str) -> Result<Consumed<StoredAuthCode>, CacheError> {
        self.consume(
            &format!("auth_code:{code}"),
            &format!("auth_code_claim:{code}"),
            self.code_ttl,
        )
        .await
    }

    /// Issues a refresh token bound to (user, client, scopes).
    pub async fn issue_refresh_token(
        &self,
        user_id: &str,
        wallet_id: Option<&str>,
        client_id: &str,
        scopes: Vec<String>,
    ) -> Result<String, CacheError> {
        let token = generate_opaque_token();
        let now = unix_now();
        let record = StoredRefreshToken {
            user_id: user_id.to_string(),
            wallet_id: wallet_id.map(str::to_string),
            client_id: client_id.to_string(),
            scopes,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
        };
        self.cache
            .set_with_ttl(&format!("refresh_token:{token}"), &record, self.refresh_ttl + 60)
            .await?;
        Ok(token)
    }

    /// Rotates a refresh token: exactly one concurrent caller wins, the old
    /// token dies either way, and tokens issued before a revocation cutoff
    /// are refused.
    pub async fn rotate_refresh_token(
        &self,
        token: &str,
    ) -> Result<Consumed<StoredRefreshToken>, CacheError> {
        let key = format!("refresh_token:{token}");
        let record: Option<StoredRefreshToken> = self.cache.get(&key).await?;
        let Some(record) = record else {
            return Ok(Consumed::Missing);
        };

        if unix_now() >= record.expires_at {
            self.cache.delete(&key).await?;
            return Ok(Consumed::Missing);
        }

        // Revocation writes a cutoff instant for the pair; anything issued
        // at or before it is dead even though the record still exists.
        let cutoff: Option<i64> = self
            .cache
            .get(&refresh_cutoff_key(&record.user_id, &record.client_id))
            .await?;
        if let Some(cutoff) = cutoff {
            if record.issued_at as i64 <= cutoff {
                self.cache.delete(&key).await?;
                return Ok(Consumed::Missing);
            }
        }

        let claimed = self
            .cache
            .set_nx(&format!("refresh_claim:{token}"), &true, self.refresh_ttl)
            .await?;
        if !claimed {
            return Ok(Consumed::Replayed);
        }
        self.cache.delete(&key).await?;
        Ok(Consumed::Fresh(record))
    }

    /// Shared claim-then-delete consumption for one-time records.
    async fn consume<T: DeserializeOwned + Send + Sync>(
        &self,
        record_key: &str,
        claim_key: &str,
        claim_ttl: u64,
    ) -> Result<Consumed<T>, CacheError> {
        let record: Option<T> = self.cache.get(record_key).await?;
        let Some(record) = record else {
            // Distinguish never-existed/expired from already-redeemed so
            // replays surface as conflicts.
            let claimed_before = self.cache.get::<bool>(claim_key).await?.is_some();
            return Ok(if claimed_before {
                Consumed::Replayed
            } else {
                Consumed::Missing
            });
        };

        let claimed = self.cache.set_nx(claim_key, &true, claim_ttl + 60).await?;
        if !claimed {
            return Ok(Consumed::Replayed);
        }
        self.cache.delete(record_key).await?;
        Ok(Consumed::Fresh(record))
    }
}
