//! Revocation of (user, client, scope) grants.
//!
//! The ledger write is the authoritative, synchronous step: once an entry
//! exists, verification rejects that scope on any token issued at or before
//! the revocation instant, ahead of the token's own expiry. Propagation to
//! the identity provider and the mini-app's webhook is asynchronous and
//! best-effort; failures there are logged, never retried automatically, and
//! never unwind the ledger write.

use crate::cache::{Cache, CacheBackend, CacheError};
use crate::clients::identity::IdentityClient;
use crate::clients::registry::RegistryClient;
use crate::errors::ApiError;
use crate::grants::GrantStore;
use crate::webhooks::WebhookDispatcher;
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

/// A single revoked (user, client, scope) grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub revoked_at: i64,
    pub reason: String,
    pub event_id: String,
}

fn ledger_key(user_id: &str, client_id: &str, scope: &str) -> String {
    format!("revoked:{user_id}:{client_id}:{scope}")
}

/// Key of the refresh cutoff marker for a (user, client) pair.
///
/// Refresh tokens issued at or before the stored instant are dead; checking
/// the marker at grant time replaces enumerating stored sessions.
pub fn refresh_cutoff_key(user_id: &str, client_id: &str) -> String {
    format!("refresh_cutoff:{user_id}:{client_id}")
}

/// Durable record of revoked grants, consulted during token verification.
#[derive(Clone)]
pub struct RevocationLedger {
    cache: Arc<Cache>,
    entry_ttl_secs: u64,
}

impl RevocationLedger {
    /// `token_ttl_secs` bounds the remaining lifetime of any outstanding
    /// token, so ledger entries outlive every token they must kill.
    pub fn new(cache: Arc<Cache>, token_ttl_secs: u64) -> Self {
        Self {
            cache,
            entry_ttl_secs: token_ttl_secs.max(3600) + 60,
        }
    }

    /// Appends one entry per scope. Returns how many entries were written.
    pub async fn record(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        entry: &RevocationEntry,
    ) -> Result<usize, CacheError> {
        for scope in scopes {
            self.cache
                .set_with_ttl(&ledger_key(user_id, client_id, scope), entry, self.entry_ttl_secs)
                .await?;
        }
        Ok(scopes.len())
    }

    /// Whether a single scope is revoked for the pair. A store failure is
    /// logged and reads as not-revoked so a degraded store does not take
    /// every verified call down with it.
    pub async fn is_revoked(&self, user_id: &str, client_id: &str, scope: &str) -> bool {
        match self
            .cache
            .get::<RevocationEntry>(&ledger_key(user_id, client_id, scope))
            .await
        {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                error!("revocation ledger lookup failed for scope '{scope}': {e}");
                false
            }
        }
    }

    /// Splits `scopes` into (live, revoked) for the pair, preserving order.
    pub async fn partition(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let mut live = Vec::new();
        let mut revoked = Vec::new();
        for scope in scopes {
            if self.is_revoked(user_id, client_id, scope).await {
                revoked.push(scope.clone());
            } else {
                live.push(scope.clone());
            }
        }
        (live, revoked)
    }
}

/// Outcome of a revocation call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevocationOutcome {
    pub success: bool,
    pub user_id: String,
    pub client_id: String,
    pub revoked_scopes: Vec<String>,
    /// Ledger entries written; each one invalidates that scope across every
    /// outstanding token for the pair.
    pub invalidated_tokens_count: usize,
    pub revoked_at: String,
    pub reason: String,
    pub revocation_event_id: String,
}

/// Revokes grants and fans the news out to collaborators.
#[derive(Clone)]
pub struct RevocationService {
    cache: Arc<Cache>,
    ledger: RevocationLedger,
    grants: GrantStore,
    registry: Arc<RegistryClient>,
    identity: Arc<IdentityClient>,
    dispatcher: WebhookDispatcher,
    refresh_ttl_secs: u64,
}

impl RevocationService {
    pub fn new(
        cache: Arc<Cache>,
        ledger: RevocationLedger,
        grants: GrantStore,
        registry: Arc<RegistryClient>,
        identity: Arc<IdentityClient>,
        dispatcher: WebhookDispatcher,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            cache,
            ledger,
            grants,
            registry,
            identity,
            dispatcher,
            refresh_ttl_secs,
        }
    }

    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    /// Revokes `scopes` for the pair; an empty list revokes everything the
    /// user ever granted the client.
    pub async fn revoke(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: Vec<String>,
        reason: &str,
    ) -> Result<RevocationOutcome, ApiError> {
        if user_id.is_empty() {
            return Err(ApiError::invalid_request("user_id is required"));
        }
        if client_id.is_empty() {
            return Err(ApiError::invalid_request("client_id is required"));
        }

        let scopes = if scopes.is_empty() {
            self.grants
                .granted_scopes(user_id, client_id)
                .await
                .map_err(|e| ApiError::internal(format!("failed to load grants: {e}")))?
        } else {
            scopes
        };

        let now = Utc::now();
        let revoked_at = now.timestamp();
        let event_id = format!("rev_{revoked_at}_{client_id}");
        let entry = RevocationEntry {
            revoked_at,
            reason: reason.to_string(),
            event_id: event_id.clone(),
        };

        // Step 1: the authoritative ledger write. Failure here fails the
        // whole call; nothing below does.
        let invalidated = self
            .ledger
            .record(user_id, client_id, &scopes, &entry)
            .await
            .map_err(|e| ApiError::internal(format!("revocation ledger write failed: {e}")))?;

        // Step 2: tear down consent and refresh artifacts for the pair.
        if let Err(e) = self.grants.clear(user_id, client_id).await {
            warn!("failed to clear grants for {user_id}/{client_id}: {e}");
        }
        if let Err(e) = self
            .cache
            .set_with_ttl(&refresh_cutoff_key(user_id, client_id), &revoked_at, self.refresh_ttl_secs)
            .await
        {
            warn!("failed to write refresh cutoff for {user_id}/{client_id}: {e}");
        }

        // Steps 3-4: eventually-consistent propagation.
        self.spawn_identity_revocation(user_id, client_id, scopes.clone());
        self.spawn_webhook_notification(user_id, client_id, scopes.clone(), reason, revoked_at);

        info!(
            "revoked {} scope(s) for user '{}' on client '{}' ({}): {}",
            scopes.len(),
            user_id,
            client_id,
            reason,
            event_id
        );

        Ok(RevocationOutcome {
            success: true,
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            revoked_scopes: scopes,
            invalidated_tokens_count: invalidated,
            revoked_at: now.to_rfc3339(),
            reason: reason.to_string(),
            revocation_event_id: event_id,
        })
    }

    fn spawn_identity_revocation(&self, user_id: &str, client_id: &str, scopes: Vec<String>) {
        let identity = self.identity.clone();
        let user_id = user_id.to_string();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = identity.revoke_grants(&user_id, &client_id, &scopes).await {
                warn!("identity provider revocation for {user_id}/{client_id} failed: {e}");
            }
        });
    }

    fn spawn_webhook_notification(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: Vec<String>,
        reason: &str,
        revoked_at: i64,
    ) {
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let user_id = user_id.to_string();
        let client_id = client_id.to_string();
        let reason = reason.to_string();
        tokio::spawn(async move {
            let app = match registry.fetch_app(&client_id).await {
                Ok(Some(app)) => app,
                Ok(None) => {
                    warn!("cannot notify unknown client '{client_id}' of revocation");
                    return;
                }
                Err(e) => {
                    warn!("registry lookup for revocation webhook failed: {e}");
                    return;
                }
            };

            let payload = json!({
                "event": "authorization_revoked",
                "user_id": user_id,
                "client_id": client_id,
                "revoked_scopes": scopes,
                "reason": reason,
                "revoked_at": revoked_at,
                "timestamp": Utc::now().to_rfc3339(),
            });

            // Dispatch already logs its own failure; nothing to roll back.
            let _ = dispatcher.dispatch(&app, &payload).await;
        });
    }
}
