use std::ops::Deref;

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Size of Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

const PEM_TAG: &str = "PRIVATE KEY";

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    /// The key is well formed but its algorithm cannot be used for
    /// sealing or identity operations.
    #[error("unsupported key algorithm: {0}")]
    KeyAlgoUnsupported(String),
}

/// Ed25519 public key of a charm identity.
///
/// This is the key a client presents over SSH. The same key doubles as a
/// sealing recipient after conversion to X25519, which is how encrypt keys
/// are wrapped for every linked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl Deref for PublicKey {
    type Target = VerifyingKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        let key = VerifyingKey::from_bytes(&buff)
            .map_err(|e| anyhow::anyhow!("invalid ed25519 public key: {}", e))?;
        Ok(PublicKey(key))
    }
}

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Convert the Edwards point to its Montgomery form for X25519 ECDH.
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_x25519(&self) -> Result<X25519PublicKey, KeyError> {
        let edwards_bytes = self.to_bytes();
        let edwards_point = CompressedEdwardsY::from_slice(&edwards_bytes)
            .map_err(|_| anyhow::anyhow!("public key invalid edwards point"))?
            .decompress()
            .ok_or_else(|| anyhow::anyhow!("public key failed to decompress edwards point"))?;

        let montgomery_point = edwards_point.to_montgomery();
        Ok(X25519PublicKey::from(montgomery_point.to_bytes()))
    }
}

/// Ed25519 private key.
///
/// Used both as a client identity (`charm_ed25519`) and as the server's
/// long-lived host key, which also signs bearer tokens.
///
/// ```ignore
/// let key = SecretKey::generate();
/// std::fs::write("charm_ed25519", key.to_pem())?;
/// let recovered = SecretKey::from_pem(&std::fs::read_to_string("charm_ed25519")?)?;
/// ```
#[derive(Debug, Clone)]
pub struct SecretKey(SigningKey);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(SigningKey::from_bytes(&secret))
    }
}

impl Deref for SecretKey {
    type Target = SigningKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        Self::from(bytes)
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Convert secret key to raw bytes
    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// The on-disk identity form, also used for the server host key.
    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new(PEM_TAG, self.to_bytes());
        pem::encode(&pem)
    }

    /// Parse a secret key from PEM format
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is malformed, carries a different tag, or
    /// does not hold exactly one 32-byte seed.
    pub fn from_pem(pem_str: &str) -> Result<Self, KeyError> {
        let pem = pem::parse(pem_str).map_err(|e| anyhow::anyhow!("failed to parse PEM: {}", e))?;

        if pem.tag() != PEM_TAG {
            return Err(anyhow::anyhow!("invalid PEM tag, expected PRIVATE KEY").into());
        }

        let contents = pem.contents();
        if contents.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size in PEM, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                contents.len()
            )
            .into());
        }

        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        bytes.copy_from_slice(contents);
        Ok(Self::from(bytes))
    }

    /// PKCS#8 (v2, public key included) DER encoding, as expected by JWT signers.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, KeyError> {
        let doc = self
            .0
            .to_pkcs8_der()
            .map_err(|e| anyhow::anyhow!("pkcs8 encode error: {}", e))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// The scalar bytes of the Ed25519 key used directly as an X25519 secret.
    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0.to_scalar_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pem_serialization() {
        let private_key = SecretKey::generate();

        let pem = private_key.to_pem();
        let recovered_private = SecretKey::from_pem(&pem).unwrap();
        assert_eq!(private_key.to_bytes(), recovered_private.to_bytes());
        assert_eq!(
            private_key.public().to_bytes(),
            recovered_private.public().to_bytes()
        );
    }

    #[test]
    fn test_pem_rejects_wrong_tag() {
        let pem = pem::encode(&pem::Pem::new("PUBLIC KEY", [0u8; PRIVATE_KEY_SIZE]));
        assert!(SecretKey::from_pem(&pem).is_err());
    }

    #[test]
    fn test_x25519_agreement_matches() {
        let a = SecretKey::generate();
        let b = SecretKey::generate();

        let ab = a.to_x25519().diffie_hellman(&b.public().to_x25519().unwrap());
        let ba = b.to_x25519().diffie_hellman(&a.public().to_x25519().unwrap());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_pkcs8_der_prefix() {
        let key = SecretKey::generate();
        let der = key.to_pkcs8_der().unwrap();
        // SEQUENCE tag followed by the Ed25519 OID somewhere in the header
        assert_eq!(der[0], 0x30);
        assert!(der.windows(3).any(|w| w == [0x2b, 0x65, 0x70]));
    }
}
