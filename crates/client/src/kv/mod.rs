//! Replicated key-value store.
//!
//! Each named store is a local multi-version [`Engine`] kept in step with
//! the account's sequence of the same name. Version `v` of the store lives
//! on the server as the encrypted snapshot `<name>/<v>`; version 1 is the
//! empty genesis and has no snapshot.
//!
//! Committing takes the next sequence number, replays whatever other
//! devices committed in between, applies the local writes at the new
//! version and uploads them. Another device may hold an earlier version it
//! has not uploaded yet, so the replay waits for it with backoff. A commit
//! that gives up uploads an empty snapshot in place of its own version,
//! leaving no new gap; a version whose snapshot never arrives stalls
//! replication at that point.

mod backup;
mod engine;
mod txn;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::crypto::{Secret, SecretError};

use crate::client::Client;
use crate::error::ClientError;
use crate::fs::FileContent;
use crate::ring::RingError;

pub use backup::Snapshot;
pub use engine::{Engine, Entry, WriteSet};
pub use txn::Txn;

/// First version of every sequence. Never carries data.
pub const GENESIS_VERSION: u64 = 1;

/// How long a commit waits for earlier versions to be uploaded.
pub const DEFAULT_COMMIT_WAIT: Duration = Duration::from_secs(5);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

const KV_DIR_NAME: &str = "kv";
const DB_FILE_NAME: &str = "kv.sqlite";

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("snapshot encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("snapshot encryption error: {0}")]
    Crypto(#[from] SecretError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encrypt key is too short")]
    EncryptKeyShort,
    #[error("invalid kv name: {0:?}")]
    InvalidName(String),
    #[error("version {version} is not newer than {max}")]
    StaleVersion { version: u64, max: u64 },
    #[error("version {0} has not been uploaded")]
    MissingVersion(u64),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

fn validate_name(name: &str) -> Result<(), KvError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(KvError::InvalidName(name.to_string()))
    }
}

/// A named, end-to-end encrypted key-value store shared by every device
/// linked to the account.
pub struct Kv {
    name: String,
    dir: PathBuf,
    client: Arc<Client>,
    engine: Engine,
    secret: Secret,
    commit_wait: Duration,
    commit_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Kv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kv")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Kv {
    /// Open `name` under the client's data directory and sync it.
    pub async fn open(client: Arc<Client>, name: &str) -> Result<Self, KvError> {
        let dir = client.data_dir().join(KV_DIR_NAME).join(name);
        Self::open_at(client, name, dir).await
    }

    pub async fn open_at(
        client: Arc<Client>,
        name: &str,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, KvError> {
        validate_name(name)?;
        let dir = dir.into();
        let key = client.default_encrypt_key().await?;
        let secret = backup::snapshot_secret(&key)?;
        let engine = open_engine(&dir).await?;

        let kv = Self {
            name: name.to_string(),
            dir,
            client,
            engine,
            secret,
            commit_wait: DEFAULT_COMMIT_WAIT,
            commit_lock: tokio::sync::Mutex::new(()),
        };
        kv.sync().await?;
        Ok(kv)
    }

    /// Bound the wait for other devices' uploads during [`Kv::commit`].
    pub fn with_commit_wait(mut self, wait: Duration) -> Self {
        self.commit_wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn local_version(&self) -> Result<u64, KvError> {
        self.engine.max_version().await
    }

    /// Replay every version the server has that we lack.
    ///
    /// Stops quietly at the first version whose snapshot is missing and
    /// returns the local version reached.
    #[tracing::instrument(skip(self), fields(name = %self.name))]
    pub async fn sync(&self) -> Result<u64, KvError> {
        let server = self.client.get_seq(&self.name).await?;
        if let Some(missing) = self.pull(server).await? {
            tracing::warn!(version = missing, "snapshot not uploaded yet, sync stopped");
        }
        self.local_version().await
    }

    /// Restore versions up to `until`, returning the first one that is missing.
    async fn pull(&self, until: u64) -> Result<Option<u64>, KvError> {
        let mut version = self.engine.max_version().await?.max(GENESIS_VERSION);
        while version < until {
            let next = version + 1;
            let path = blob_path(&self.name, next);
            let blob = match self.client.read_file(&path).await {
                Ok(FileContent::File(blob)) => blob,
                Ok(FileContent::Dir(_)) => {
                    return Err(KvError::Corrupt(format!("{} is a directory", path)))
                }
                Err(ClientError::NotFound) => return Ok(Some(next)),
                Err(e) => return Err(e.into()),
            };

            let snapshot = backup::open(&self.secret, &path, &blob)?;
            if snapshot.until != next {
                return Err(KvError::Corrupt(format!(
                    "{} holds version {}",
                    path, snapshot.until
                )));
            }
            self.engine.restore(next, &snapshot.entries).await?;
            tracing::debug!(version = next, entries = snapshot.entries.len(), "restored");
            version = next;
        }
        Ok(None)
    }

    /// Restore versions up to `until`, waiting for ones still being uploaded.
    async fn catch_up(&self, until: u64) -> Result<(), KvError> {
        let deadline = tokio::time::Instant::now() + self.commit_wait;
        let mut delay = RETRY_BASE_DELAY;
        loop {
            let Some(missing) = self.pull(until).await? else {
                return Ok(());
            };
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(KvError::MissingVersion(missing));
            }
            tracing::debug!(version = missing, ?delay, "waiting for snapshot upload");
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(RETRY_MAX_DELAY);
        }
    }

    /// Upload an empty snapshot for a version taken but not committed.
    async fn abandon(&self, version: u64) -> Result<(), KvError> {
        let snapshot = Snapshot {
            since: version - 1,
            until: version,
            entries: Vec::new(),
        };
        let path = blob_path(&self.name, version);
        let blob = backup::seal(&self.secret, &path, &snapshot)?;
        self.client.write_file(&path, blob, None).await?;
        Ok(())
    }

    /// Start a transaction at the current local version.
    pub async fn begin(&self) -> Result<Txn<'_>, KvError> {
        Ok(Txn::new(self, self.local_version().await?))
    }

    /// Commit `txn` at a fresh version and upload it.
    ///
    /// Returns the version the writes landed at. An empty transaction
    /// commits nothing and returns the current local version.
    ///
    /// Fails with [`KvError::MissingVersion`] when an earlier version is
    /// still not uploaded once the commit wait runs out.
    #[tracing::instrument(skip(self, txn), fields(name = %self.name, writes = txn.writes.len()))]
    pub async fn commit(&self, txn: Txn<'_>) -> Result<u64, KvError> {
        if txn.is_empty() {
            return self.local_version().await;
        }
        let _guard = self.commit_lock.lock().await;

        let version = self.client.next_seq(&self.name).await?;
        if let Err(e) = self.catch_up(version - 1).await {
            match self.abandon(version).await {
                Ok(()) => tracing::info!(version, "filled abandoned version"),
                Err(fill) => tracing::warn!(version, "failed to fill abandoned version: {}", fill),
            }
            return Err(e);
        }

        let prior = self.engine.max_version().await?;
        self.engine.commit(version, &txn.writes).await?;

        let snapshot = Snapshot {
            since: prior,
            until: version,
            entries: self.engine.backup(prior, version).await?,
        };
        let path = blob_path(&self.name, version);
        let blob = backup::seal(&self.secret, &path, &snapshot)?;
        self.client.write_file(&path, blob, None).await?;
        tracing::debug!(version, "committed");
        Ok(version)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let version = self.local_version().await?;
        self.engine.get(key, version).await
    }

    pub async fn set(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<u64, KvError> {
        let mut txn = self.begin().await?;
        txn.set(key, value);
        self.commit(txn).await
    }

    pub async fn delete(&self, key: impl Into<Vec<u8>>) -> Result<u64, KvError> {
        let mut txn = self.begin().await?;
        txn.delete(key);
        self.commit(txn).await
    }

    pub async fn keys(&self) -> Result<Vec<Vec<u8>>, KvError> {
        let version = self.local_version().await?;
        self.engine.keys(version).await
    }

    /// Throw away the local copy and rebuild it from the server.
    pub async fn reset(&mut self) -> Result<u64, KvError> {
        self.engine.close().await;
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        self.engine = open_engine(&self.dir).await?;
        tracing::info!(name = %self.name, "local kv reset");
        self.sync().await
    }
}

async fn open_engine(dir: &Path) -> Result<Engine, KvError> {
    std::fs::create_dir_all(dir)?;
    Engine::open(&dir.join(DB_FILE_NAME)).await
}

fn blob_path(name: &str, version: u64) -> String {
    format!("{}/{}", name, version)
}
