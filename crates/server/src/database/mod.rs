//! Identity store.
//!
//! Every account mutation is exactly one SQLite transaction. Cascades run
//! from `charm_user` through `public_key`, `encrypt_key` and `named_seq`,
//! so deleting a user or a key never leaves dependents behind.

mod encrypt_key_queries;
mod key_queries;
mod link_token_queries;
mod models;
mod news_queries;
mod seq_queries;
mod sqlite;
mod user_queries;

use std::ops::Deref;

use sqlx::{Sqlite, SqlitePool, Transaction};

pub use models::UserRecord;

#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    pub async fn connect(database_url: &url::Url) -> Result<Self, DatabaseSetupError> {
        if database_url.scheme() == "sqlite" {
            let db = sqlite::connect_sqlite(database_url).await?;
            sqlite::migrate_sqlite(&db).await?;
            return Ok(Database::new(db));
        }

        Err(DatabaseSetupError::UnknownDbType(
            database_url.scheme().to_string(),
        ))
    }

    /// A fresh, migrated in-memory store.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let url = url::Url::parse("sqlite::memory:")
            .map_err(|e| DatabaseSetupError::UnknownDbType(e.to_string()))?;
        Self::connect(&url).await
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }

    /// Open a transaction that holds the write lock from its first statement.
    ///
    /// A deferred transaction that reads before it writes cannot wait out a
    /// concurrent writer when it upgrades; it fails with `SQLITE_BUSY` at once.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.0.begin_with("BEGIN IMMEDIATE").await
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),

    #[error("requested database type was not recognized: {0}")]
    UnknownDbType(String),
}

/// Failures of identity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found")]
    MissingUser,
    #[error("name already taken")]
    NameTaken,
    #[error("invalid name")]
    NameInvalid,
    #[error("could not unlink key")]
    CouldNotUnlinkKey,
    #[error("public key is not linked to this account")]
    KeyNotLinked,
    #[error("public key belongs to another account")]
    KeyOwnedElsewhere,
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use common::crypto::{AuthorizedKey, SecretKey};

    use super::*;

    fn new_key() -> AuthorizedKey {
        AuthorizedKey::from(&SecretKey::generate().public())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = url::Url::parse(&format!(
            "sqlite://{}",
            dir.path().join("charm.db").display()
        ))
        .unwrap();
        let db = Database::connect(&url).await.unwrap();

        let survivor_key = new_key();
        let survivor_id = db.user_for_key(&survivor_key, true).await.unwrap().id;
        let mut victims = Vec::new();
        for _ in 0..8 {
            let key = new_key();
            let user = db.user_for_key(&key, true).await.unwrap();
            victims.push((user.id, key));
        }

        // each task reads before it writes; all of them contend for the lock
        let mut tasks = Vec::new();
        for (i, (victim_id, key)) in victims.iter().cloned().enumerate() {
            let db = db.clone();
            let survivor_key = survivor_key.clone();
            tasks.push(tokio::spawn(async move {
                db.add_encrypt_key(survivor_id, &survivor_key, &format!("k{}", i), "c", None)
                    .await?;
                db.add_encrypt_key(victim_id, &key, "victim", "c", None)
                    .await?;
                db.merge_users(survivor_id, victim_id).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let keys = db.keys_for_user(survivor_id).await.unwrap();
        assert_eq!(keys.len(), 9);
        assert_eq!(db.encrypt_keys_for(&survivor_key).await.unwrap().len(), 8);
    }
}
