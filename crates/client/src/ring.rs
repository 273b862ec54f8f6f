//! The account's encrypt-key ring.
//!
//! Every ring key exists on the server once per linked public key, sealed to
//! that key. A client holds the plaintext of whichever keys it could open
//! with the identities in its data directory.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use time::OffsetDateTime;
use uuid::Uuid;

use common::crypto::{self, AuthorizedKey, KeyError, PasswordSealError, SealError};
use common::protocol::{Auth, EncryptKey, EncryptKeyUpload};

use crate::client::Client;
use crate::error::ClientError;
use crate::identity::{find_identities, Identity};

/// Size of a freshly generated ring key before encoding.
pub const RING_KEY_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("sealed box error: {0}")]
    Seal(#[from] SealError),
    #[error("encryption error: {0}")]
    Crypt(#[from] PasswordSealError),
    #[error("no encrypt keys available")]
    Empty,
    #[error("unknown encrypt key: {0}")]
    UnknownKey(String),
    #[error("encrypted key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("random number generator failure: {0}")]
    Random(String),
}

/// A decrypted ring key.
#[derive(Clone, PartialEq, Eq)]
pub struct RingKey {
    pub global_id: String,
    /// base64 text of the random key material
    pub key: String,
    pub created_at: Option<OffsetDateTime>,
}

impl std::fmt::Debug for RingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingKey")
            .field("global_id", &self.global_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl RingKey {
    pub fn generate() -> Result<Self, RingError> {
        let mut bytes = [0u8; RING_KEY_SIZE];
        getrandom::getrandom(&mut bytes).map_err(|e| RingError::Random(e.to_string()))?;
        // stored timestamps have second precision, keep ours identical
        let created_at = OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp())
            .ok();
        Ok(Self {
            global_id: Uuid::new_v4().to_string(),
            key: STANDARD.encode(bytes),
            created_at,
        })
    }

    /// Raw key material.
    pub fn material(&self) -> Result<Vec<u8>, RingError> {
        Ok(STANDARD.decode(&self.key)?)
    }

    pub fn seal_to(&self, recipient: &AuthorizedKey) -> Result<EncryptKeyUpload, RingError> {
        let sealed = crypto::seal(recipient, self.key.as_bytes())?;
        Ok(EncryptKeyUpload {
            public_key: recipient.to_authorized(),
            global_id: self.global_id.clone(),
            encrypted_key: STANDARD.encode(sealed),
            created_at: self.created_at,
        })
    }

    /// Open `encrypted` with the first identity that can.
    pub fn open(encrypted: &EncryptKey, identities: &[Identity]) -> Option<Self> {
        let sealed = STANDARD.decode(&encrypted.encrypted_key).ok()?;
        identities.iter().find_map(|identity| {
            let plaintext = crypto::open(identity.secret(), &sealed).ok()?;
            let key = String::from_utf8(plaintext).ok()?;
            Some(Self {
                global_id: encrypted.global_id.clone(),
                key,
                created_at: encrypted.created_at,
            })
        })
    }
}

/// Plaintext ring ordered by creation time, so the default key agrees
/// across devices.
#[derive(Debug, Default)]
pub(crate) struct Ring {
    keys: Vec<RingKey>,
}

impl Ring {
    pub fn contains(&self, global_id: &str) -> bool {
        self.keys.iter().any(|k| k.global_id == global_id)
    }

    pub fn insert(&mut self, key: RingKey) {
        if self.contains(&key.global_id) {
            return;
        }
        self.keys.push(key);
        self.keys.sort_by(|a, b| {
            (a.created_at, &a.global_id).cmp(&(b.created_at, &b.global_id))
        });
    }

    pub fn get(&self, global_id: &str) -> Option<&RingKey> {
        self.keys.iter().find(|k| k.global_id == global_id)
    }

    pub fn first(&self) -> Option<&RingKey> {
        self.keys.first()
    }

    pub fn keys(&self) -> &[RingKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Client {
    /// Bring the in-memory ring up to date with a fresh `api-auth` response.
    pub(crate) async fn load_ring(&self, auth: &Auth) -> Result<(), ClientError> {
        if auth.encrypt_keys.is_empty() && self.ring.lock().is_empty() {
            let key = RingKey::generate()?;
            let upload = key.seal_to(&self.identity().public_key())?;
            self.http.call(upload, &auth.jwt).await?;
            tracing::info!(global_id = %key.global_id, "created encrypt key");
            self.ring.lock().insert(key);
            return Ok(());
        }

        let missing: Vec<&EncryptKey> = {
            let ring = self.ring.lock();
            auth.encrypt_keys
                .iter()
                .filter(|k| !ring.contains(&k.global_id))
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let identities = self.local_identities();
        let mut ring = self.ring.lock();
        for encrypted in missing {
            match RingKey::open(encrypted, &identities) {
                Some(key) => ring.insert(key),
                None => tracing::debug!(
                    global_id = %encrypted.global_id,
                    "no local identity opens encrypt key"
                ),
            }
        }
        Ok(())
    }

    fn local_identities(&self) -> Vec<Identity> {
        let mut identities = vec![self.identity().clone()];
        let mut seen: HashSet<AuthorizedKey> = HashSet::from([self.identity().public_key()]);
        for identity in find_identities(self.data_dir()) {
            if seen.insert(identity.public_key()) {
                identities.push(identity);
            }
        }
        identities
    }

    /// Decrypted ring keys, oldest first.
    pub async fn encrypt_keys(&self) -> Result<Vec<RingKey>, ClientError> {
        self.auth().await?;
        Ok(self.ring.lock().keys().to_vec())
    }

    /// The key used when none is named: the oldest in the ring.
    pub async fn default_encrypt_key(&self) -> Result<RingKey, ClientError> {
        self.auth().await?;
        self.ring
            .lock()
            .first()
            .cloned()
            .ok_or_else(|| RingError::Empty.into())
    }

    pub async fn encrypt_key(&self, global_id: &str) -> Result<RingKey, ClientError> {
        self.auth().await?;
        self.ring
            .lock()
            .get(global_id)
            .cloned()
            .ok_or_else(|| RingError::UnknownKey(global_id.to_string()).into())
    }

    /// Seal every ring key to every key linked to the account.
    ///
    /// Uploads are idempotent on the server, so this is safe to repeat.
    pub async fn sync_encrypt_keys(&self) -> Result<(), ClientError> {
        let jwt = self.jwt().await?;
        let linked = self.authorized_keys().await?;
        let keys = self.ring.lock().keys().to_vec();

        let mut uploaded = 0;
        for record in &linked.keys {
            let recipient: AuthorizedKey = record.key.parse()?;
            for key in &keys {
                let upload = match key.seal_to(&recipient) {
                    Ok(upload) => upload,
                    Err(RingError::Seal(SealError::Key(KeyError::KeyAlgoUnsupported(algo)))) => {
                        tracing::warn!(algorithm = %algo, "cannot seal encrypt keys to this key");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                self.http.call(upload, &jwt).await?;
                uploaded += 1;
            }
        }
        tracing::debug!(keys = keys.len(), linked = linked.keys.len(), uploaded, "encrypt keys synced");

        self.invalidate_auth().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::crypto::SecretKey;

    use super::*;

    fn key_at(id: &str, secs: i64) -> RingKey {
        RingKey {
            global_id: id.to_string(),
            key: STANDARD.encode([7u8; RING_KEY_SIZE]),
            created_at: OffsetDateTime::from_unix_timestamp(secs).ok(),
        }
    }

    #[test]
    fn test_ring_orders_by_creation() {
        let mut ring = Ring::default();
        ring.insert(key_at("b", 20));
        ring.insert(key_at("c", 10));
        ring.insert(key_at("a", 20));
        ring.insert(key_at("c", 30));

        let ids: Vec<&str> = ring.keys().iter().map(|k| k.global_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(ring.first().unwrap().global_id, "c");
    }

    #[test]
    fn test_generate() {
        let a = RingKey::generate().unwrap();
        let b = RingKey::generate().unwrap();
        assert_ne!(a.global_id, b.global_id);
        assert_eq!(a.material().unwrap().len(), RING_KEY_SIZE);
        assert_eq!(a.created_at.unwrap().nanosecond(), 0);
    }

    #[test]
    fn test_seal_then_open_with_any_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mine = Identity::new(SecretKey::generate(), dir.path().join("charm_ed25519"));
        let other = Identity::new(SecretKey::generate(), dir.path().join("charm_other"));
        let key = RingKey::generate().unwrap();

        let upload = key.seal_to(&mine.public_key()).unwrap();
        let encrypted = EncryptKey {
            global_id: upload.global_id,
            encrypted_key: upload.encrypted_key,
            public_key: Some(upload.public_key),
            created_at: upload.created_at,
        };

        assert!(RingKey::open(&encrypted, std::slice::from_ref(&other)).is_none());
        let opened = RingKey::open(&encrypted, &[other, mine]).unwrap();
        assert_eq!(opened, key);
    }
}
