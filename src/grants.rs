//! Persisted scope grants: the record of what a user already consented to
//! for a given mini-app, consulted to skip re-prompting. Critical scopes are
//! never recorded here since they require per-use confirmation.

use crate::cache::{Cache, CacheBackend, CacheError};
use crate::scopes::{self, Sensitivity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantedScope {
    pub scope: String,
    pub approved_at: u64,
    /// Which flow recorded the consent (e.g. "oauth_consent", "device_flow").
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantRecord {
    pub scopes: Vec<GrantedScope>,
}

fn grant_key(user_id: &str, client_id: &str) -> String {
    format!("scope_grant:{user_id}:{client_id}")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Store for prior-consent records, one per (user, client) pair.
#[derive(Clone)]
pub struct GrantStore {
    cache: Arc<Cache>,
    ttl_secs: u64,
}

impl GrantStore {
    pub fn new(cache: Arc<Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    /// Records consent for the non-critical members of `scopes`, merging with
    /// whatever was already granted.
    pub async fn record(
        &self,
        user_id: &str,
        client_id: &str,
        requested: &[String],
        method: &str,
    ) -> Result<(), CacheError> {
        let key = grant_key(user_id, client_id);
        let mut record: GrantRecord = self.cache.get(&key).await?.unwrap_or_default();
        let approved_at = unix_now();

        for scope in requested {
            if scopes::classify(scope) == Sensitivity::Critical {
                continue;
            }
            if !record.scopes.iter().any(|g| g.scope == *scope) {
                record.scopes.push(GrantedScope {
                    scope: scope.clone(),
                    approved_at,
                    method: method.to_string(),
                });
            }
        }

        self.cache.set_with_ttl(&key, &record, self.ttl_secs).await
    }

    /// All scopes the user previously granted this client.
    pub async fn granted_scopes(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<String>, CacheError> {
        let record: Option<GrantRecord> = self.cache.get(&grant_key(user_id, client_id)).await?;
        Ok(record
            .map(|r| r.scopes.into_iter().map(|g| g.scope).collect())
            .unwrap_or_default())
    }

    /// Whether prior consent covers every requested scope. Critical scopes
    /// are never covered: they re-prompt on every flow.
    pub async fn covers(
        &self,
        user_id: &str,
        client_id: &str,
        requested: &[String],
    ) -> Result<bool, CacheError> {
        if requested
            .iter()
            .any(|s| scopes::classify(s) == Sensitivity::Critical)
        {
            return Ok(false);
        }
        let granted = self.granted_scopes(user_id, client_id).await?;
        Ok(requested.iter().all(|s| granted.contains(s)))
    }

    /// Drops every grant for the pair, forcing re-consent.
    pub async fn clear(&self, user_id: &str, client_id: &str) -> Result<(), CacheError> {
        self.cache.delete(&grant_key(user_id, client_id)).await
    }
}
