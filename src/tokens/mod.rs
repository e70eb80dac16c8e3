//! Capability token minting and verification.
//!
//! A capability token is a signed, self-contained claim set granting a
//! mini-app scoped access on behalf of a user. Tokens are never persisted;
//! everything needed to verify one is in the token itself plus the key ring,
//! with the revocation ledger consulted separately by callers.

pub mod keys;

use crate::scopes;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use keys::KeyRing;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The `token_type` claim carried by every capability token.
pub const TOKEN_TYPE: &str = "capability_access_token";

/// The only accepted signing algorithm. A token declaring anything else is
/// rejected before signature verification is even attempted.
const SIGNING_ALGORITHM: Algorithm = Algorithm::EdDSA;

/// Claim set of a capability token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Issuer.
    pub iss: String,
    /// Subject: the platform user the token acts for.
    pub sub: String,
    /// Audience: the mini-app client id.
    pub aud: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Not before (unix seconds).
    pub nbf: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
    /// Always [`TOKEN_TYPE`].
    pub token_type: String,
    /// Granted scopes, space-joined in canonical order.
    pub scope: String,
    /// The user's wallet reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    /// Session this token was issued under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Opaque launch context supplied by the flow.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl CapabilityClaims {
    /// The scope claim split back into individual scopes, order preserved.
    pub fn scopes(&self) -> Vec<String> {
        scopes::parse_scope_string(&self.scope)
    }
}

/// Inputs to [`TokenIssuer::mint`].
#[derive(Debug, Clone, Default)]
pub struct MintRequest {
    pub subject: String,
    pub audience: String,
    pub scopes: Vec<String>,
    pub wallet_id: Option<String>,
    pub session_id: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("invalid scope set: {0}")]
    InvalidScopeSet(String),
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Why verification failed. Externally every kind collapses to a generic
/// `invalid_token`; the distinction exists for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("token has expired")]
    Expired,
    #[error("token is not yet valid")]
    NotYetValid,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token declares an unsupported algorithm")]
    AlgorithmMismatch,
    #[error("token issuer mismatch")]
    IssuerMismatch,
    #[error("unexpected token type")]
    WrongTokenType,
    #[error("token signed with an unknown key")]
    UnknownKey,
    #[error("token is malformed")]
    Malformed,
    #[error("token scopes are revoked")]
    Revoked,
}

/// Mints and verifies capability tokens with a single active signing key.
#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    ttl_secs: i64,
    keys: KeyRing,
}

impl TokenIssuer {
    pub fn new(issuer: impl Into<String>, keys: KeyRing, ttl_secs: i64) -> Self {
        Self {
            issuer: issuer.into(),
            ttl_secs,
            keys,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Builds, signs and serializes a capability token.
    ///
    /// The scope set must be non-empty and drawn entirely from the platform
    /// vocabulary; duplicates collapse to their first occurrence so the
    /// `scope` claim is canonical.
    pub fn mint(&self, request: MintRequest) -> Result<(String, CapabilityClaims), MintError> {
        if request.scopes.is_empty() {
            return Err(MintError::InvalidScopeSet("scope set is empty".to_string()));
        }

        let mut seen = Vec::with_capacity(request.scopes.len());
        for scope in &request.scopes {
            if !scopes::is_platform_scope(scope) {
                return Err(MintError::InvalidScopeSet(format!(
                    "'{scope}' is not a platform scope"
                )));
            }
            if !seen.contains(scope) {
                seen.push(scope.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = CapabilityClaims {
            iss: self.issuer.clone(),
            sub: request.subject,
            aud: request.audience,
            iat: now,
            nbf: now,
            exp: now + self.ttl_secs,
            jti: Uuid::new_v4().to_string(),
            token_type: TOKEN_TYPE.to_string(),
            scope: seen.join(" "),
            wallet_id: request.wallet_id,
            session_id: request.session_id,
            context: request.context,
        };

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(self.keys.active_kid().to_string());

        let token = encode(&header, &claims, self.keys.encoding())?;
        Ok((token, claims))
    }

    /// Verifies a token's signature and registered claims.
    ///
    /// The header is inspected first: any algorithm other than the configured
    /// one is rejected unconditionally, and the kid must name a known key.
    /// Revocation is a separate, per-scope concern handled by the caller.
    pub fn verify(&self, token: &str) -> Result<CapabilityClaims, VerifyError> {
        let header = decode_header(token).map_err(|_| VerifyError::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(VerifyError::AlgorithmMismatch);
        }
        let kid = header.kid.ok_or(VerifyError::UnknownKey)?;
        let key = self.keys.decoding_for(&kid).ok_or(VerifyError::UnknownKey)?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_nbf = true;
        // Audience binding is checked by resource endpoints that know which
        // client is calling, not here.
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);

        let data = decode::<CapabilityClaims>(token, key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
                ErrorKind::InvalidSignature => VerifyError::BadSignature,
                ErrorKind::InvalidAlgorithm => VerifyError::AlgorithmMismatch,
                ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
                _ => VerifyError::Malformed,
            }
        })?;

        if data.claims.token_type != TOKEN_TYPE {
            return Err(VerifyError::WrongTokenType);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::EncodingKey;

    fn test_issuer() -> TokenIssuer {
        TokenIssuer::new(
            "https://cap.example.com",
            KeyRing::generate("test-key").unwrap(),
            3600,
        )
    }

    fn mint_request(scopes: &[&str]) -> MintRequest {
        MintRequest {
            subject: "@alice:platform.example".to_string(),
            audience: "app_weather".to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            wallet_id: Some("w_alice".to_string()),
            session_id: Some("sess_1".to_string()),
            context: HashMap::new(),
        }
    }

    #[test]
    fn test_mint_verify_round_trip() {
        let issuer = test_issuer();
        let (token, minted) = issuer
            .mint(mint_request(&["wallet:pay", "wallet:balance"]))
            .unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.iss, "https://cap.example.com");
        assert_eq!(claims.sub, "@alice:platform.example");
        assert_eq!(claims.aud, "app_weather");
        assert_eq!(claims.scope, "wallet:pay wallet:balance");
        assert_eq!(claims.token_type, TOKEN_TYPE);
        assert_eq!(claims.jti, minted.jti);
        assert_eq!(claims.wallet_id.as_deref(), Some("w_alice"));
        assert_eq!(claims.exp, claims.iat + 3600);
    }

    #[test]
    fn test_scope_claim_deduplicates_preserving_order() {
        let issuer = test_issuer();
        let (_, claims) = issuer
            .mint(mint_request(&["wallet:pay", "user:read", "wallet:pay"]))
            .unwrap();
        assert_eq!(claims.scope, "wallet:pay user:read");
        assert_eq!(claims.scopes(), vec!["wallet:pay", "user:read"]);
    }

    #[test]
    fn test_mint_rejects_empty_scope_set() {
        assert!(matches!(
            test_issuer().mint(mint_request(&[])),
            Err(MintError::InvalidScopeSet(_))
        ));
    }

    #[test]
    fn test_mint_rejects_non_platform_scopes() {
        // Identity-provider scopes belong in the IdP's own tokens.
        assert!(matches!(
            test_issuer().mint(mint_request(&["wallet:pay", "openid"])),
            Err(MintError::InvalidScopeSet(_))
        ));
        assert!(matches!(
            test_issuer().mint(mint_request(&["made:up"])),
            Err(MintError::InvalidScopeSet(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected_despite_valid_signature() {
        let keys = KeyRing::generate("test-key").unwrap();
        let stale = TokenIssuer::new("https://cap.example.com", keys.clone(), -100);
        let fresh = TokenIssuer::new("https://cap.example.com", keys, 3600);

        let (token, _) = stale.mint(mint_request(&["user:read"])).unwrap();
        assert_eq!(fresh.verify(&token), Err(VerifyError::Expired));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let issuer = test_issuer();
        // Same kid, different key material.
        let imposter = TokenIssuer::new(
            "https://cap.example.com",
            KeyRing::generate("test-key").unwrap(),
            3600,
        );
        let (token, _) = imposter.mint(mint_request(&["user:read"])).unwrap();
        assert_eq!(issuer.verify(&token), Err(VerifyError::BadSignature));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let issuer = test_issuer();
        let other = TokenIssuer::new(
            "https://cap.example.com",
            KeyRing::generate("rotated-away").unwrap(),
            3600,
        );
        let (token, _) = other.mint(mint_request(&["user:read"])).unwrap();
        assert_eq!(issuer.verify(&token), Err(VerifyError::UnknownKey));
    }

    #[test]
    fn test_algorithm_confusion_rejected() {
        let issuer = test_issuer();
        let now = Utc::now().timestamp();
        let claims = CapabilityClaims {
            iss: "https://cap.example.com".to_string(),
            sub: "@alice:platform.example".to_string(),
            aud: "app_weather".to_string(),
            iat: now,
            nbf: now,
            exp: now + 3600,
            jti: "fake".to_string(),
            token_type: TOKEN_TYPE.to_string(),
            scope: "user:read".to_string(),
            wallet_id: None,
            session_id: None,
            context: HashMap::new(),
        };

        // A well-formed HS256 token must be rejected on the algorithm alone,
        // even with the right kid in the header.
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        let forged = encode(&header, &claims, &EncodingKey::from_secret(b"guessable")).unwrap();

        assert_eq!(issuer.verify(&forged), Err(VerifyError::AlgorithmMismatch));
    }

    #[test]
    fn test_issuer_mismatch_rejected() {
        let keys = KeyRing::generate("test-key").unwrap();
        let ours = TokenIssuer::new("https://cap.example.com", keys.clone(), 3600);
        let theirs = TokenIssuer::new("https://rogue.example.com", keys, 3600);

        let (token, _) = theirs.mint(mint_request(&["user:read"])).unwrap();
        assert_eq!(ours.verify(&token), Err(VerifyError::IssuerMismatch));
    }

    #[test]
    fn test_wrong_token_type_rejected() {
        let issuer = test_issuer();
        let now = Utc::now().timestamp();
        let claims = CapabilityClaims {
            iss: "https://cap.example.com".to_string(),
            sub: "@alice:platform.example".to_string(),
            aud: "app_weather".to_string(),
            iat: now,
            nbf: now,
            exp: now + 3600,
            jti: "x".to_string(),
            token_type: "refresh_token".to_string(),
            scope: "user:read".to_string(),
            wallet_id: None,
            session_id: None,
            context: HashMap::new(),
        };
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some("test-key".to_string());
        let token = encode(&header, &claims, issuer.keys.encoding()).unwrap();

        assert_eq!(issuer.verify(&token), Err(VerifyError::WrongTokenType));
    }

    #[test]
    fn test_not_yet_valid_rejected() {
        let issuer = test_issuer();
        let now = Utc::now().timestamp();
        let claims = CapabilityClaims {
            iss: "https://cap.example.com".to_string(),
            sub: "@alice:platform.example".to_string(),
            aud: "app_weather".to_string(),
            iat: now,
            nbf: now + 600,
            exp: now + 3600,
            jti: "x".to_string(),
            token_type: TOKEN_TYPE.to_string(),
            scope: "user:read".to_string(),
            wallet_id: None,
            session_id: None,
            context: HashMap::new(),
        };
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some("test-key".to_string());
        let token = encode(&header, &claims, issuer.keys.encoding()).unwrap();

        assert_eq!(issuer.verify(&token), Err(VerifyError::NotYetValid));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(
            test_issuer().verify("not.a.token"),
            Err(VerifyError::Malformed)
        );
    }
}
