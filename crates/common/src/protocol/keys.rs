use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub id: i64,
    /// `authorized_keys` form, without comment.
    pub key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Response of the `api-keys` SSH command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keys {
    /// Index into `keys` of the key the session authenticated with, or -1.
    pub active_key: i64,
    pub keys: Vec<PublicKeyRecord>,
}

impl Keys {
    pub fn active(&self) -> Option<&PublicKeyRecord> {
        usize::try_from(self.active_key)
            .ok()
            .and_then(|i| self.keys.get(i))
    }
}

/// Stdin of the `api-unlink` SSH command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub key: String,
}
