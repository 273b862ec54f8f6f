//! Private keys a client authenticates with and opens sealed encrypt keys with.
//!
//! Keys live in the client's data directory as `charm_<algorithm>` (PEM) next
//! to a `.pub` file holding the `authorized_keys` line. Only Ed25519 can be
//! generated or used to open sealed boxes.

use std::fs;
use std::path::{Path, PathBuf};

use common::crypto::{AuthorizedKey, KeyError, SecretKey};

use crate::config::{ClientConfig, KeyType};
use crate::error::ClientError;

pub const KEY_FILE_PREFIX: &str = "charm_";
pub const ED25519_KEY_FILE: &str = "charm_ed25519";

#[derive(Clone)]
pub struct Identity {
    secret: SecretKey,
    path: PathBuf,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("path", &self.path)
            .field("public_key", &self.public_key().to_authorized())
            .finish()
    }
}

impl Identity {
    pub fn new(secret: SecretKey, path: impl Into<PathBuf>) -> Self {
        Self {
            secret,
            path: path.into(),
        }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn public_key(&self) -> AuthorizedKey {
        AuthorizedKey::from(&self.secret.public())
    }

    pub fn read(path: &Path) -> Result<Self, ClientError> {
        let pem = fs::read_to_string(path)?;
        let secret = SecretKey::from_pem(&pem)?;
        Ok(Self::new(secret, path))
    }

    /// Generate a key and persist it at `path` plus `path.pub`.
    pub fn create(path: &Path) -> Result<Self, ClientError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let secret = SecretKey::generate();
        fs::write(path, secret.to_pem())?;
        restrict_permissions(path)?;

        let identity = Self::new(secret, path);
        fs::write(
            path.with_extension("pub"),
            format!("{}\n", identity.public_key()),
        )?;
        tracing::info!(path = %path.display(), "created new identity");
        Ok(identity)
    }

    /// The identity this client authenticates with.
    ///
    /// An explicit `identity_file` must exist. Otherwise the key in the data
    /// directory is used, and generated on first run.
    pub fn load_or_create(config: &ClientConfig) -> Result<Self, ClientError> {
        if let Some(path) = &config.identity_file {
            if !path.exists() {
                return Err(ClientError::Auth(format!(
                    "missing identity file {}",
                    path.display()
                )));
            }
            return Self::read(path);
        }

        if config.key_type != KeyType::Ed25519 {
            return Err(KeyError::KeyAlgoUnsupported(format!("{:?}", config.key_type)).into());
        }

        let path = config.data_dir()?.join(ED25519_KEY_FILE);
        if path.exists() {
            Self::read(&path)
        } else {
            Self::create(&path)
        }
    }
}

/// Every usable identity in `dir`. Keys that cannot be read are skipped.
pub fn find_identities(dir: &Path) -> Vec<Identity> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "no identities found: {}", e);
            return Vec::new();
        }
    };

    let mut identities: Vec<Identity> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            path.is_file() && name.starts_with(KEY_FILE_PREFIX) && path.extension().is_none()
        })
        .filter_map(|path| match Identity::read(&path) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::debug!(path = %path.display(), "skipping key: {}", e);
                None
            }
        })
        .collect();
    identities.sort_by(|a, b| a.path.cmp(&b.path));
    identities
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> ClientConfig {
        ClientConfig {
            data_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let first = Identity::load_or_create(&config).unwrap();
        let second = Identity::load_or_create(&config).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        let line = fs::read_to_string(dir.path().join("charm_ed25519.pub")).unwrap();
        assert_eq!(line.trim().parse::<AuthorizedKey>().unwrap(), first.public_key());
    }

    #[test]
    fn test_missing_identity_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            identity_file: Some(dir.path().join("nope")),
            ..config_in(dir.path())
        };
        assert!(matches!(
            Identity::load_or_create(&config),
            Err(ClientError::Auth(_))
        ));
    }

    #[test]
    fn test_rsa_generation_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            key_type: KeyType::Rsa,
            ..config_in(dir.path())
        };
        assert!(matches!(
            Identity::load_or_create(&config),
            Err(ClientError::Key(KeyError::KeyAlgoUnsupported(_)))
        ));
    }

    #[test]
    fn test_find_identities_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let a = Identity::create(&dir.path().join("charm_ed25519")).unwrap();
        let b = Identity::create(&dir.path().join("charm_ed25519_old")).unwrap();
        fs::write(dir.path().join("charm_rsa"), "not a key").unwrap();
        fs::write(dir.path().join("other"), "unrelated").unwrap();

        let found: Vec<AuthorizedKey> = find_identities(dir.path())
            .iter()
            .map(Identity::public_key)
            .collect();
        assert_eq!(found, vec![a.public_key(), b.public_key()]);
    }
}
