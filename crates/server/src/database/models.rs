use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::OffsetDateTime;

use common::protocol::{EncryptKey, PublicKeyRecord, User};

pub(crate) fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn timestamp(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// A `charm_user` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub charm_id: String,
    pub name: Option<String>,
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            charm_id: row.try_get("charm_id")?,
            name: row.try_get("name")?,
            created_at: timestamp(row.try_get("created_at")?),
        })
    }

    pub fn into_user(self, public_key: Option<PublicKeyRecord>) -> User {
        User {
            charm_id: self.charm_id,
            name: self.name,
            public_key,
            created_at: self.created_at,
        }
    }
}

/// A `public_key` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub id: i64,
    pub user_id: i64,
    pub public_key: String,
    pub created_at: OffsetDateTime,
}

impl KeyRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            public_key: row.try_get("public_key")?,
            created_at: timestamp(row.try_get("created_at")?),
        })
    }
}

impl From<KeyRecord> for PublicKeyRecord {
    fn from(record: KeyRecord) -> Self {
        PublicKeyRecord {
            id: record.id,
            key: record.public_key,
            created_at: record.created_at,
        }
    }
}

/// An `encrypt_key` row joined with the key it is sealed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptKeyRecord {
    pub global_id: String,
    pub encrypted_key: String,
    pub public_key: String,
    pub created_at: OffsetDateTime,
}

impl EncryptKeyRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            global_id: row.try_get("global_id")?,
            encrypted_key: row.try_get("encrypted_key")?,
            public_key: row.try_get("public_key")?,
            created_at: timestamp(row.try_get("created_at")?),
        })
    }
}

impl From<EncryptKeyRecord> for EncryptKey {
    fn from(record: EncryptKeyRecord) -> Self {
        EncryptKey {
            global_id: record.global_id,
            encrypted_key: record.encrypted_key,
            public_key: Some(record.public_key),
            created_at: Some(record.created_at),
        }
    }
}
