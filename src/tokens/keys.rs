//! Signing key material for capability tokens.
//!
//! Exactly one Ed25519 key is active for signing at any time; verification
//! goes through a kid-indexed map so that rotated-out keys could keep
//! verifying in-flight tokens.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use log::warn;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("signing key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("signing key is not a valid Ed25519 PKCS#8 document")]
    InvalidKey,
    #[error("failed to generate signing key")]
    Generation,
}

/// Holds the active signing key and all keys accepted for verification.
#[derive(Clone)]
pub struct KeyRing {
    active_kid: String,
    encoding: EncodingKey,
    verification: HashMap<String, DecodingKey>,
}

impl KeyRing {
    /// Builds a key ring from a base64-encoded Ed25519 PKCS#8 document.
    pub fn from_base64_pkcs8(kid: &str, encoded: &str) -> Result<Self, KeyError> {
        let der = STANDARD.decode(encoded.trim())?;
        Self::from_pkcs8(kid, &der)
    }

    /// Builds a key ring from an Ed25519 PKCS#8 DER document.
    pub fn from_pkcs8(kid: &str, pkcs8_der: &[u8]) -> Result<Self, KeyError> {
        let key_pair =
            Ed25519KeyPair::from_pkcs8(pkcs8_der).map_err(|_| KeyError::InvalidKey)?;
        let public = key_pair.public_key().as_ref().to_vec();

        let mut verification = HashMap::new();
        verification.insert(kid.to_string(), DecodingKey::from_ed_der(&public));

        Ok(Self {
            active_kid: kid.to_string(),
            encoding: EncodingKey::from_ed_der(pkcs8_der),
            verification,
        })
    }

    /// Generates an ephemeral key pair. Tokens signed with it do not survive
    /// a restart, so this is only for development and tests.
    pub fn generate(kid: &str) -> Result<Self, KeyError> {
        warn!("no signing key configured, generating an ephemeral Ed25519 key");
        let rng = ring::rand::SystemRandom::new();
        let document =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyError::Generation)?;
        Self::from_pkcs8(kid, document.as_ref())
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Verification key for a token's kid header, if the key is known.
    pub fn decoding_for(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification.get(kid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_lookup() {
        let ring = KeyRing::generate("test-key-1").unwrap();
        assert_eq!(ring.active_kid(), "test-key-1");
        assert!(ring.decoding_for("test-key-1").is_some());
        assert!(ring.decoding_for("other-key").is_none());
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(matches!(
            KeyRing::from_base64_pkcs8("k", "not base64!!!"),
            Err(KeyError::Encoding(_))
        ));
    }

    #[test]
    fn test_garbage_der_rejected() {
        assert!(matches!(
            KeyRing::from_pkcs8("k", &[0u8; 16]),
            Err(KeyError::InvalidKey)
        ));
    }
}
