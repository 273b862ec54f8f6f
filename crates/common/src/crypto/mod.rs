//! Cryptographic primitives for charm
//!
//! - **Identity**: Ed25519 keypairs (`SecretKey`/`PublicKey`). Clients present
//!   them over SSH; the server's host key also signs bearer tokens.
//! - **SSH key forms**: `AuthorizedKey` is the wire/`authorized_keys` form the
//!   identity store keys accounts on.
//! - **Symmetric encryption**: ChaCha20-Poly1305 `Secret`s.
//! - **Sealed box**: encrypt-to-public-key using X25519 ECDH on the converted
//!   Ed25519 keys. Used to wrap every encrypt key once per linked key.
//! - **Password seal**: scrypt-stretched passphrase encryption, used by the
//!   application level encrypt/decrypt that treat a ring key as a passphrase.

mod authorized_key;
mod keys;
mod password;
mod sealed_box;
mod secret;

pub use authorized_key::{AuthorizedKey, ED25519_ALGORITHM, RSA_ALGORITHM};
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use password::{
    open_with_password, seal_with_password, seal_with_password_cost, PasswordSealError,
    DEFAULT_LOG_N,
};
pub use sealed_box::{open, seal, SealError};
pub use secret::{Secret, SecretError, SECRET_SIZE};
