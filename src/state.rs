use crate::breaker::BreakerRegistry;
use crate::cache::{Cache, CacheBackend};
use crate::clients::identity::{self, IdentityClient};
use crate::clients::registry::{self, RegistryClient};
use crate::config::CapConfig;
use crate::grants::GrantStore;
use crate::revocation::{RevocationLedger, RevocationService};
use crate::tokens::{keys::KeyRing, CapabilityClaims, TokenIssuer, VerifyError};
use crate::webhooks::WebhookDispatcher;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CapConfig>,
    pub cache: Arc<Cache>,
    pub issuer: Arc<TokenIssuer>,
    pub breakers: Arc<BreakerRegistry>,
    pub registry: Arc<RegistryClient>,
    pub identity: Arc<IdentityClient>,
    pub grants: GrantStore,
    pub revocations: Arc<RevocationService>,
}

impl AppState {
    /// Builds the full dependency graph around an already-created store.
    pub fn with_existing_cache(config: CapConfig, cache: Cache) -> Result<Self, std::io::Error> {
        let keys = match &config.tokens.signing_key {
            Some(encoded) => KeyRing::from_base64_pkcs8(&config.tokens.key_id, encoded),
            None => KeyRing::generate(&config.tokens.key_id),
        }
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

        let issuer = Arc::new(TokenIssuer::new(
            config.tokens.issuer.clone(),
            keys,
            config.tokens.access_ttl as i64,
        ));

        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout),
        ));

        let registry = Arc::new(RegistryClient::new(
            &config.registry,
            breakers.get(registry::DEPENDENCY),
        ));
        let identity = Arc::new(IdentityClient::new(
            &config.identity,
            breakers.get(identity::DEPENDENCY),
        ));

        let cache = Arc::new(cache);
        let grants = GrantStore::new(cache.clone(), config.tokens.refresh_ttl);
        let ledger = RevocationLedger::new(cache.clone(), config.tokens.access_ttl);
        let revocations = Arc::new(RevocationService::new(
            cache.clone(),
            ledger,
            grants.clone(),
            registry.clone(),
            identity.clone(),
            WebhookDispatcher::new(breakers.clone()),
            config.tokens.refresh_ttl,
        ));

        Ok(Self {
            config: Arc::new(config),
            cache,
            issuer,
            breakers,
            registry,
            identity,
            grants,
            revocations,
        })
    }

    pub fn ledger(&self) -> &crate::revocation::RevocationLedger {
        self.revocations.ledger()
    }

    /// Verifies a capability token and filters its scopes through the
    /// revocation ledger.
    ///
    /// Partial revocation narrows the returned scope set; a token whose
    /// every scope is revoked fails outright. Callers collapse all failure
    /// kinds to a generic invalid-token answer externally.
    pub async fn verify_token(
        &self,
        token: &str,
    ) -> Result<(CapabilityClaims, Vec<String>), VerifyError> {
        let claims = self.issuer.verify(token)?;
        let (live, revoked) = self
            .ledger()
            .partition(&claims.sub, &claims.aud, &claims.scopes())
            .await;
        if live.is_empty() {
            return Err(VerifyError::Revoked);
        }
        if !revoked.is_empty() {
            debug!(
                "token for '{}' partially revoked: {} of {} scope(s) removed",
                claims.sub,
                revoked.len(),
                revoked.len() + live.len()
            );
        }
        Ok((claims, live))
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        self.cache.health_check().await.is_ok()
    }
}
