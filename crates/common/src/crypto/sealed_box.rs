//! Hybrid encrypt-to-public-key.
//!
//! Sealing generates an ephemeral Ed25519 keypair, converts both sides to
//! X25519 and runs ECDH. The shared point is stretched with BLAKE3
//! `derive_key` (bound to both public keys) into a [`Secret`] that encrypts
//! the payload.
//!
//! ```text
//! [ ephemeral_pubkey: 32 bytes ][ nonce: 12 ][ aead(hash || plaintext) ]
//! ```

use super::authorized_key::AuthorizedKey;
use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError};

const SEALED_BOX_CONTEXT: &str = "charm 2024-01-01 sealed box v1";

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("seal error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

fn box_secret(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> Secret {
    let mut material = Vec::with_capacity(32 + 2 * PUBLIC_KEY_SIZE);
    material.extend_from_slice(shared);
    material.extend_from_slice(&ephemeral.to_bytes());
    material.extend_from_slice(&recipient.to_bytes());
    Secret::derive(SEALED_BOX_CONTEXT, &material)
}

/// Seal `plaintext` so only the holder of `recipient`'s private key can open it.
///
/// # Errors
///
/// [`KeyError::KeyAlgoUnsupported`] (wrapped) when the recipient is not an
/// Ed25519 key.
pub fn seal(recipient: &AuthorizedKey, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let recipient = recipient.ed25519()?;

    let ephemeral_private = SecretKey::generate();
    let ephemeral_public = ephemeral_private.public();

    let shared = ephemeral_private
        .to_x25519()
        .diffie_hellman(&recipient.to_x25519()?);
    let secret = box_secret(shared.as_bytes(), &ephemeral_public, &recipient);

    let ciphertext = secret.encrypt(plaintext)?;
    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(&ephemeral_public.to_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a box produced by [`seal`] with the recipient's identity.
pub fn open(identity: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
    if sealed.len() < PUBLIC_KEY_SIZE {
        return Err(anyhow::anyhow!("sealed box too short").into());
    }
    let ephemeral_public = PublicKey::try_from(&sealed[..PUBLIC_KEY_SIZE])?;

    let shared = identity
        .to_x25519()
        .diffie_hellman(&ephemeral_public.to_x25519()?);
    let secret = box_secret(shared.as_bytes(), &ephemeral_public, &identity.public());

    Ok(secret.decrypt(&sealed[PUBLIC_KEY_SIZE..])?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seal_open() {
        let identity = SecretKey::generate();
        let recipient = AuthorizedKey::from(&identity.public());

        let sealed = seal(&recipient, b"a very secret key").unwrap();
        assert_eq!(open(&identity, &sealed).unwrap(), b"a very secret key");
    }

    #[test]
    fn test_seal_is_not_deterministic() {
        let recipient = AuthorizedKey::from(&SecretKey::generate().public());
        assert_ne!(
            seal(&recipient, b"same").unwrap(),
            seal(&recipient, b"same").unwrap()
        );
    }

    #[test]
    fn test_other_identity_cannot_open() {
        let recipient = AuthorizedKey::from(&SecretKey::generate().public());
        let sealed = seal(&recipient, b"payload").unwrap();
        assert!(open(&SecretKey::generate(), &sealed).is_err());
    }

    #[test]
    fn test_truncated_box_fails() {
        let identity = SecretKey::generate();
        assert!(open(&identity, &[0u8; 10]).is_err());
    }
}
