use common::crypto::{open_with_password, seal_with_password};

use crate::client::Client;
use crate::error::ClientError;
use crate::ring::RingKey;

impl Client {
    async fn ring_key(&self, key_id: Option<&str>) -> Result<RingKey, ClientError> {
        match key_id {
            Some(id) => self.encrypt_key(id).await,
            None => self.default_encrypt_key().await,
        }
    }

    /// Encrypt with a ring key used as a passphrase, the oldest key unless one is named.
    pub async fn encrypt(&self, plaintext: &[u8], key_id: Option<&str>) -> Result<Vec<u8>, ClientError> {
        let key = self.ring_key(key_id).await?;
        Ok(seal_with_password(key.key.as_bytes(), plaintext)?)
    }

    pub async fn decrypt(&self, ciphertext: &[u8], key_id: Option<&str>) -> Result<Vec<u8>, ClientError> {
        let key = self.ring_key(key_id).await?;
        Ok(open_with_password(key.key.as_bytes(), ciphertext)?)
    }
}
