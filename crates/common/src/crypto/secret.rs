//! Symmetric encryption using ChaCha20-Poly1305
//!
//! `Secret` is the AEAD key behind the opaque blobs charm produces:
//! password-sealed payloads and encrypted KV snapshots.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A 256-bit symmetric key.
///
/// Ciphertexts are `nonce (12 bytes) || aead(plaintext) || tag (16 bytes)`.
/// Associated data is authenticated but not stored, so the reader has to
/// supply the same bytes the writer bound.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    pub fn generate() -> Self {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Derive a secret from arbitrary key material under a domain-separation context.
    pub fn derive(context: &str, material: &[u8]) -> Self {
        Self(blake3::derive_key(context, material))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        self.encrypt_with_aad(data, &[])
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        self.decrypt_with_aad(data, &[])
    }

    /// Encrypt `data` under a fresh random nonce, binding `aad` to it.
    pub fn encrypt_with_aad(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, Payload { msg: data, aad })
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by [`Secret::encrypt_with_aad`].
    ///
    /// # Errors
    ///
    /// Fails if the input is too short, or the tag does not verify: wrong
    /// key, different associated data, or tampering.
    pub fn decrypt_with_aad(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_SIZE {
            return Err(anyhow::anyhow!("data too short for nonce").into());
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| anyhow::anyhow!("decrypt error"))?;
        Ok(plaintext)
    }
}
