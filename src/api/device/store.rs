//! Storage for device authorizations.
//!
//! Records are keyed by device code; a secondary index maps the
//! human-entered user code back to the device code, so approval never scans
//! the keyspace.

use crate::cache::{Cache, CacheBackend, CacheError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Confusable-free alphabet for user codes: no 0/O, 1/I or lookalikes.
const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const USER_CODE_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DeviceStatus {
    Pending,
    Approved {
        user_id: String,
        wallet_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDeviceAuth {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(flatten)]
    pub state: DeviceStatus,
    pub created_at: u64,
    pub expires_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// High-entropy device code: 32 random bytes, base64url, stripped of the
/// URL-safe punctuation so it pastes cleanly everywhere.
fn generate_device_code() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD
        .encode(&bytes)
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect()
}

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_CODE_LENGTH)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect()
}

fn device_key(device_code: &str) -> String {
    format!("device_auth:{device_code}")
}

fn user_code_key(user_code: &str) -> String {
    format!("device_user:{user_code}")
}

#[derive(Clone)]
pub struct DeviceStore {
    cache: Arc<Cache>,
    ttl_secs: u64,
}

impl DeviceStore {
    pub fn new(cache: Arc<Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    /// Creates a pending device authorization plus its user-code index entry.
    pub async fn create(
        &self,
        client_id: &str,
        scopes: Vec<String>,
    ) -> Result<StoredDeviceAuth, CacheError> {
        let now = unix_now();
        let record = StoredDeviceAuth {
            device_code: generate_device_code(),
            user_code: generate_user_code(),
            client_id: client_id.to_string(),
            scopes,
            state: DeviceStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl_secs,
        };

        // Store TTL trails logical expiry; the timestamp check at use time
        // is authoritative, the store only garbage-collects.
        self.cache
            .set_with_ttl(&device_key(&record.device_code), &record, self.ttl_secs + 60)
            .await?;
        self.cache
            .set_with_ttl(
                &user_code_key(&record.user_code),
                &record.device_code,
                self.ttl_secs + 60,
            )
            .await?;
        Ok(record)
    }

    pub async fn find_by_device_code(
        &self,
        device_code: &str,
    ) -> Result<Option<StoredDeviceAuth>, CacheError> {
        self.cache.get(&device_key(device_code)).await
    }

    /// Secondary-index lookup: user code to full record.
    pub async fn find_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<StoredDeviceAuth>, CacheError> {
        let device_code: Option<String> = self.cache.get(&user_code_key(user_code)).await?;
        match device_code {
            Some(code) => self.find_by_device_code(&code).await,
            None => Ok(None),
        }
    }

    /// Marks a pending authorization approved, keeping its original expiry.
    pub async fn approve(
        &self,
        record: &StoredDeviceAuth,
        user_id: &str,
        wallet_id: Option<&str>,
    ) -> Result<StoredDeviceAuth, CacheError> {
        let mut approved = record.clone();
        approved.state = DeviceStatus::Approved {
            user_id: user_id.to_string(),
            wallet_id: wallet_id.map(str::to_string),
        };
        let remaining = approved.expires_at.saturating_sub(unix_now()).max(1);
        self.cache
            .set_with_ttl(&device_key(&approved.device_code), &approved, remaining + 60)
            .await?;
        Ok(approved)
    }

    /// Atomically claims the approved record for credential issuance; the
    /// losing side of a concurrent poll race gets false.
    pub async fn claim_for_issuance(&self, device_code: &str) -> Result<bool, CacheError> {
        self.cache
            .set_nx(&format!("device_claim:{device_code}"), &true, self.ttl_secs)
            .await
    }

    /// Removes a record and its user-code index entry.
    pub async fn purge(&self, record: &StoredDeviceAuth) -> Result<(), CacheError> {
        self.cache.delete(&device_key(&record.device_code)).await?;
        self.cache.delete(&user_code_key(&record.user_code)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;

    fn store() -> DeviceStore {
        let cache = Cache::InMemory(InMemoryCache::new(60, 128).unwrap());
        DeviceStore::new(Arc::new(cache), 900)
    }

    fn owned(scopes: &[&str]) -> Vec<String> {
        scopes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_user_code_alphabet() {
        let code = generate_user_code();
        assert_eq!(code.len(), USER_CODE_LENGTH);
        assert!(code.bytes().all(|b| USER_CODE_ALPHABET.contains(&b)));
        // Confusable characters never appear.
        assert!(!code.contains('0') && !code.contains('O'));
        assert!(!code.contains('1') && !code.contains('I'));
    }

    #[test]
    fn test_device_code_has_no_url_punctuation() {
        let code = generate_device_code();
        assert!(!code.contains('-') && !code.contains('_'));
        assert!(code.len() >= 32);
    }

    #[tokio::test]
    async fn test_create_and_lookup_via_index() {
        let store = store();
        let record = store
            .create("app_tv", owned(&["user:read"]))
            .await
            .unwrap();

        let by_device = store
            .find_by_device_code(&record.device_code)
            .await
            .unwrap()
            .expect("device code should resolve");
        assert_eq!(by_device.user_code, record.user_code);
        assert_eq!(by_device.state, DeviceStatus::Pending);

        let by_user = store
            .find_by_user_code(&record.user_code)
            .await
            .unwrap()
            .expect("user code should resolve through the index");
        assert_eq!(by_user.device_code, record.device_code);

        assert!(store.find_by_user_code("WRONGCODE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approve_preserves_record() {
        let store = store();
        let record = store
            .create("app_tv", owned(&["user:read"]))
            .await
            .unwrap();

        store
            .approve(&record, "@alice:x", Some("w_alice"))
            .await
            .unwrap();

        let found = store
            .find_by_device_code(&record.device_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            found.state,
            DeviceStatus::Approved {
                user_id: "@alice:x".to_string(),
                wallet_id: Some("w_alice".to_string()),
            }
        );
        assert_eq!(found.expires_at, record.expires_at);
    }

    #[tokio::test]
    async fn test_purge_removes_both_keys() {
        let store = store();
        let record = store.create("app_tv", owned(&["user:read"])).await.unwrap();

        store.purge(&record).await.unwrap();
        assert!(store
            .find_by_device_code(&record.device_code)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_user_code(&record.user_code)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_issuance_claimed_once() {
        let store = store();
        let record = store.create("app_tv", owned(&["user:read"])).await.unwrap();

        assert!(store.claim_for_issuance(&record.device_code).await.unwrap());
        assert!(!store.claim_for_issuance(&record.device_code).await.unwrap());
    }
}
