use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::KvError;

const MAX_CONNECTIONS: u32 = 4;

/// Pending writes of a transaction. `None` deletes the key.
pub type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// One versioned write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub version: u64,
    pub value: Option<Vec<u8>>,
}

/// Multi-version key-value store on SQLite.
///
/// Every write is kept under the version it was committed at, so reads can
/// be served at any earlier version and `(since, until]` ranges can be
/// exported and replayed elsewhere.
#[derive(Clone, Debug)]
pub struct Engine(SqlitePool);

impl Engine {
    pub async fn open(path: &Path) -> Result<Self, KvError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    pub async fn in_memory() -> Result<Self, KvError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, KvError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self(pool))
    }

    pub async fn close(&self) {
        self.0.close().await;
    }

    /// Highest committed or restored version, 0 when empty.
    pub async fn max_version(&self) -> Result<u64, KvError> {
        let version: i64 = sqlx::query("SELECT max_version FROM kv_meta WHERE id = 1")
            .fetch_one(&self.0)
            .await?
            .try_get("max_version")?;
        Ok(version as u64)
    }

    /// Value of `key` as of version `at`.
    pub async fn get(&self, key: &[u8], at: u64) -> Result<Option<Vec<u8>>, KvError> {
        let row = sqlx::query(
            r#"
            SELECT value FROM kv
            WHERE key = ?1 AND version <= ?2
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(at as i64)
        .fetch_optional(&self.0)
        .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<Vec<u8>>, _>("value")?),
            None => Ok(None),
        }
    }

    /// Live keys as of version `at`, sorted.
    pub async fn keys(&self, at: u64) -> Result<Vec<Vec<u8>>, KvError> {
        let rows = sqlx::query(
            r#"
            SELECT k.key FROM kv k
            WHERE k.version = (
                SELECT MAX(version) FROM kv WHERE key = k.key AND version <= ?1
            )
            AND k.value IS NOT NULL
            ORDER BY k.key
            "#,
        )
        .bind(at as i64)
        .fetch_all(&self.0)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<Vec<u8>, _>("key").map_err(KvError::from))
            .collect()
    }

    /// Apply `writes` at exactly `version`, which must be newer than anything stored.
    pub async fn commit(&self, version: u64, writes: &WriteSet) -> Result<(), KvError> {
        let mut tx = self.0.begin().await?;

        let max: i64 = sqlx::query("SELECT max_version FROM kv_meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?
            .try_get("max_version")?;
        if version as i64 <= max {
            return Err(KvError::StaleVersion {
                version,
                max: max as u64,
            });
        }

        for (key, value) in writes {
            sqlx::query("INSERT INTO kv (key, version, value) VALUES (?1, ?2, ?3)")
                .bind(key.as_slice())
                .bind(version as i64)
                .bind(value.as_deref())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE kv_meta SET max_version = ?1 WHERE id = 1")
            .bind(version as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Every write in `(since, until]`, in version order.
    pub async fn backup(&self, since: u64, until: u64) -> Result<Vec<Entry>, KvError> {
        let rows = sqlx::query(
            r#"
            SELECT key, version, value FROM kv
            WHERE version > ?1 AND version <= ?2
            ORDER BY version ASC, key ASC
            "#,
        )
        .bind(since as i64)
        .bind(until as i64)
        .fetch_all(&self.0)
        .await?;

        rows.iter()
            .map(|row| -> Result<Entry, KvError> {
                Ok(Entry {
                    key: row.try_get("key")?,
                    version: row.try_get::<i64, _>("version")? as u64,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    /// Replay a backup and advance the max version to `version`.
    ///
    /// Replaying the same range twice is harmless.
    pub async fn restore(&self, version: u64, entries: &[Entry]) -> Result<(), KvError> {
        let mut tx = self.0.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO kv (key, version, value) VALUES (?1, ?2, ?3)
                ON CONFLICT (key, version) DO NOTHING
                "#,
            )
            .bind(entry.key.as_slice())
            .bind(entry.version as i64)
            .bind(entry.value.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE kv_meta SET max_version = MAX(max_version, ?1) WHERE id = 1")
            .bind(version as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writes(pairs: &[(&str, Option<&str>)]) -> WriteSet {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.map(|v| v.as_bytes().to_vec())))
            .collect()
    }

    #[tokio::test]
    async fn test_reads_at_version() {
        let engine = Engine::in_memory().await.unwrap();
        assert_eq!(engine.max_version().await.unwrap(), 0);

        engine
            .commit(2, &writes(&[("a", Some("1")), ("b", Some("x"))]))
            .await
            .unwrap();
        engine
            .commit(3, &writes(&[("a", Some("2")), ("b", None)]))
            .await
            .unwrap();

        assert_eq!(engine.max_version().await.unwrap(), 3);
        assert_eq!(engine.get(b"a", 1).await.unwrap(), None);
        assert_eq!(engine.get(b"a", 2).await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"a", 3).await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.get(b"b", 3).await.unwrap(), None);

        assert_eq!(
            engine.keys(2).await.unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(engine.keys(3).await.unwrap(), vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_commit_rejects_old_version() {
        let engine = Engine::in_memory().await.unwrap();
        engine.commit(5, &writes(&[("a", Some("1"))])).await.unwrap();

        let err = engine
            .commit(5, &writes(&[("a", Some("2"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::StaleVersion { version: 5, max: 5 }));
        assert_eq!(engine.get(b"a", 5).await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_backup_restore_range() {
        let source = Engine::in_memory().await.unwrap();
        source.commit(2, &writes(&[("a", Some("1"))])).await.unwrap();
        source
            .commit(3, &writes(&[("a", None), ("c", Some("3"))]))
            .await
            .unwrap();

        let replica = Engine::in_memory().await.unwrap();
        let first = source.backup(0, 2).await.unwrap();
        assert_eq!(first.len(), 1);
        replica.restore(2, &first).await.unwrap();
        assert_eq!(replica.get(b"a", 2).await.unwrap(), Some(b"1".to_vec()));

        let second = source.backup(2, 3).await.unwrap();
        replica.restore(3, &second).await.unwrap();
        replica.restore(3, &second).await.unwrap();

        assert_eq!(replica.max_version().await.unwrap(), 3);
        assert_eq!(replica.keys(3).await.unwrap(), vec![b"c".to_vec()]);
        assert_eq!(replica.backup(0, 3).await.unwrap(), source.backup(0, 3).await.unwrap());
    }
}
