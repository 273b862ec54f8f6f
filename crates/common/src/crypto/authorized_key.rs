//! SSH public keys in wire and `authorized_keys` form.
//!
//! Accounts are keyed on whatever key a client presents over SSH, so the
//! store has to accept RSA keys too. Those are kept as opaque wire blobs;
//! only Ed25519 keys can be decoded into a [`PublicKey`] and sealed to.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, PublicKey, PUBLIC_KEY_SIZE};

pub const ED25519_ALGORITHM: &str = "ssh-ed25519";
pub const RSA_ALGORITHM: &str = "ssh-rsa";

/// An SSH public key, canonicalised as `"<algorithm> <base64 wire blob>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthorizedKey {
    algorithm: String,
    blob: Vec<u8>,
}

impl AuthorizedKey {
    /// Decode a key from its SSH wire encoding (`string algorithm || key data`).
    pub fn from_wire(blob: &[u8]) -> Result<Self, KeyError> {
        let (algorithm, rest) = read_string(blob)?;
        let algorithm = std::str::from_utf8(algorithm)
            .map_err(|_| anyhow::anyhow!("key algorithm is not utf-8"))?
            .to_string();

        if algorithm == ED25519_ALGORITHM {
            let (key, rest) = read_string(rest)?;
            if key.len() != PUBLIC_KEY_SIZE || !rest.is_empty() {
                return Err(anyhow::anyhow!("malformed ssh-ed25519 key").into());
            }
        }

        Ok(Self {
            algorithm,
            blob: blob.to_vec(),
        })
    }

    /// Parse an `authorized_keys` line. A trailing comment is ignored.
    pub fn parse(line: &str) -> Result<Self, KeyError> {
        let mut parts = line.split_whitespace();
        let algorithm = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty public key"))?;
        let encoded = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("public key is missing its key data"))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("public key base64 decode error: {}", e))?;

        let key = Self::from_wire(&blob)?;
        if key.algorithm != algorithm {
            return Err(anyhow::anyhow!(
                "public key type mismatch: line says {}, blob says {}",
                algorithm,
                key.algorithm
            )
            .into());
        }
        Ok(key)
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn to_wire(&self) -> &[u8] {
        &self.blob
    }

    pub fn to_authorized(&self) -> String {
        format!("{} {}", self.algorithm, STANDARD.encode(&self.blob))
    }

    /// The Ed25519 key behind this SSH key.
    ///
    /// # Errors
    ///
    /// [`KeyError::KeyAlgoUnsupported`] for anything that is not `ssh-ed25519`.
    pub fn ed25519(&self) -> Result<PublicKey, KeyError> {
        if self.algorithm != ED25519_ALGORITHM {
            return Err(KeyError::KeyAlgoUnsupported(self.algorithm.clone()));
        }
        let (_, rest) = read_string(&self.blob)?;
        let (key, _) = read_string(rest)?;
        PublicKey::try_from(key)
    }
}

impl From<&PublicKey> for AuthorizedKey {
    fn from(key: &PublicKey) -> Self {
        let mut blob = Vec::with_capacity(4 + ED25519_ALGORITHM.len() + 4 + PUBLIC_KEY_SIZE);
        write_string(&mut blob, ED25519_ALGORITHM.as_bytes());
        write_string(&mut blob, &key.to_bytes());
        Self {
            algorithm: ED25519_ALGORITHM.to_string(),
            blob,
        }
    }
}

impl From<PublicKey> for AuthorizedKey {
    fn from(key: PublicKey) -> Self {
        AuthorizedKey::from(&key)
    }
}

impl FromStr for AuthorizedKey {
    type Err = KeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AuthorizedKey {
    type Error = KeyError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AuthorizedKey> for String {
    fn from(key: AuthorizedKey) -> Self {
        key.to_authorized()
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_authorized())
    }
}

fn read_string(data: &[u8]) -> Result<(&[u8], &[u8]), KeyError> {
    if data.len() < 4 {
        return Err(anyhow::anyhow!("truncated ssh wire string").into());
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let rest = &data[4..];
    if rest.len() < len {
        return Err(anyhow::anyhow!("truncated ssh wire string").into());
    }
    Ok((&rest[..len], &rest[len..]))
}

fn write_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_authorized_line_round_trip() {
        let public = SecretKey::generate().public();
        let key = AuthorizedKey::from(&public);
        let line = format!("{} me@laptop", key);

        let parsed = AuthorizedKey::parse(&line).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.algorithm(), ED25519_ALGORITHM);
        assert_eq!(parsed.ed25519().unwrap(), public);
    }

    #[test]
    fn test_rsa_key_is_opaque() {
        let mut blob = Vec::new();
        write_string(&mut blob, RSA_ALGORITHM.as_bytes());
        write_string(&mut blob, &[0x01, 0x00, 0x01]);
        write_string(&mut blob, &[0x00, 0xc3, 0x11, 0x42]);

        let key = AuthorizedKey::from_wire(&blob).unwrap();
        assert_eq!(key.algorithm(), RSA_ALGORITHM);
        assert!(matches!(
            key.ed25519(),
            Err(KeyError::KeyAlgoUnsupported(_))
        ));
        assert_eq!(AuthorizedKey::parse(&key.to_authorized()).unwrap(), key);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let key = AuthorizedKey::from(&SecretKey::generate().public());
        let encoded = key.to_authorized();
        let (_, data) = encoded.split_once(' ').unwrap();
        assert!(AuthorizedKey::parse(&format!("ssh-rsa {}", data)).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(AuthorizedKey::parse("").is_err());
        assert!(AuthorizedKey::parse("ssh-ed25519").is_err());
        assert!(AuthorizedKey::parse("ssh-ed25519 !!!!").is_err());
        assert!(AuthorizedKey::from_wire(&[0, 0, 0, 9, b's']).is_err());
    }

    #[test]
    fn test_serde_uses_authorized_form() {
        let key = AuthorizedKey::from(&SecretKey::generate().public());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_authorized()));
        let back: AuthorizedKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
