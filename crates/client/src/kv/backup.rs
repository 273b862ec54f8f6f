use serde::{Deserialize, Serialize};

use common::crypto::{Secret, SECRET_SIZE};

use super::engine::Entry;
use super::KvError;
use crate::ring::RingKey;

const SNAPSHOT_KEY_CONTEXT: &str = "charm 2024-01-01 kv snapshot v1";

/// The writes of `(since, until]`, as uploaded to `<name>/<until>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub since: u64,
    pub until: u64,
    pub entries: Vec<Entry>,
}

/// Symmetric key for snapshots, derived from a ring key.
pub fn snapshot_secret(key: &RingKey) -> Result<Secret, KvError> {
    let material = key.material()?;
    if material.len() < SECRET_SIZE {
        return Err(KvError::EncryptKeyShort);
    }
    Ok(Secret::derive(SNAPSHOT_KEY_CONTEXT, &material))
}

/// Encrypt `snapshot` for upload to `path`. The path is bound as associated
/// data, so a blob moved to another version no longer opens.
pub fn seal(secret: &Secret, path: &str, snapshot: &Snapshot) -> Result<Vec<u8>, KvError> {
    let frame = bincode::serialize(snapshot)?;
    Ok(secret.encrypt_with_aad(&frame, path.as_bytes())?)
}

pub fn open(secret: &Secret, path: &str, blob: &[u8]) -> Result<Snapshot, KvError> {
    let frame = secret.decrypt_with_aad(blob, path.as_bytes())?;
    Ok(bincode::deserialize(&frame)?)
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;

    fn ring_key(material: &[u8]) -> RingKey {
        RingKey {
            global_id: "k".to_string(),
            key: STANDARD.encode(material),
            created_at: None,
        }
    }

    #[test]
    fn test_seal_open() {
        let secret = snapshot_secret(&RingKey::generate().unwrap()).unwrap();
        let snapshot = Snapshot {
            since: 1,
            until: 2,
            entries: vec![Entry {
                key: b"a".to_vec(),
                version: 2,
                value: None,
            }],
        };

        let blob = seal(&secret, "notes/2", &snapshot).unwrap();
        assert_eq!(open(&secret, "notes/2", &blob).unwrap(), snapshot);
        assert!(matches!(
            open(&secret, "notes/3", &blob),
            Err(KvError::Crypto(_))
        ));

        let other = snapshot_secret(&RingKey::generate().unwrap()).unwrap();
        assert!(matches!(
            open(&other, "notes/2", &blob),
            Err(KvError::Crypto(_))
        ));
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            snapshot_secret(&ring_key(&[1u8; 16])),
            Err(KvError::EncryptKeyShort)
        ));
        assert!(snapshot_secret(&ring_key(&[1u8; SECRET_SIZE])).is_ok());
    }
}
