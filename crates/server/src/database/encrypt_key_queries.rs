use sqlx::Row;
use time::OffsetDateTime;

use common::crypto::AuthorizedKey;

use super::models::{now, EncryptKeyRecord};
use super::{Database, StoreError};

impl Database {
    /// Store one ciphertext of ring key `global_id`, sealed to `public_key`.
    ///
    /// The key must be linked to `user_id`. An existing ciphertext for the
    /// same `(public_key, global_id)` is kept and the new one dropped, which
    /// makes client resyncs safe to repeat.
    pub async fn add_encrypt_key(
        &self,
        user_id: i64,
        public_key: &AuthorizedKey,
        global_id: &str,
        encrypted_key: &str,
        created_at: Option<OffsetDateTime>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin_write().await?;

        let key_row = sqlx::query("SELECT id FROM public_key WHERE public_key = ?1 AND user_id = ?2")
            .bind(public_key.to_authorized())
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let public_key_id: i64 = match key_row {
            Some(row) => row.try_get("id")?,
            None => return Err(StoreError::KeyNotLinked),
        };

        let created_at = created_at
            .map(|t| t.unix_timestamp())
            .unwrap_or_else(now);

        sqlx::query(
            r#"
            INSERT INTO encrypt_key (public_key_id, global_id, encrypted_key, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (public_key_id, global_id) DO NOTHING
            "#,
        )
        .bind(public_key_id)
        .bind(global_id)
        .bind(encrypted_key)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Ciphertexts sealed to `public_key`, oldest first.
    pub async fn encrypt_keys_for(
        &self,
        public_key: &AuthorizedKey,
    ) -> Result<Vec<EncryptKeyRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ek.global_id, ek.encrypted_key, ek.created_at, pk.public_key
            FROM encrypt_key ek
            INNER JOIN public_key pk ON pk.id = ek.public_key_id
            WHERE pk.public_key = ?1
            ORDER BY ek.created_at ASC, ek.id ASC
            "#,
        )
        .bind(public_key.to_authorized())
        .fetch_all(&**self)
        .await?;

        rows.iter()
            .map(|row| EncryptKeyRecord::from_row(row).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use common::crypto::SecretKey;

    use super::*;

    fn new_key() -> AuthorizedKey {
        AuthorizedKey::from(&SecretKey::generate().public())
    }

    #[tokio::test]
    async fn test_resync_keeps_first_ciphertext() {
        let db = Database::in_memory().await.unwrap();
        let key = new_key();
        let user = db.user_for_key(&key, true).await.unwrap();

        db.add_encrypt_key(user.id, &key, "k1", "first", None)
            .await
            .unwrap();
        db.add_encrypt_key(user.id, &key, "k1", "second", None)
            .await
            .unwrap();

        let keys = db.encrypt_keys_for(&key).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].encrypted_key, "first");
    }

    #[tokio::test]
    async fn test_ordered_by_creation() {
        let db = Database::in_memory().await.unwrap();
        let key = new_key();
        let user = db.user_for_key(&key, true).await.unwrap();
        let earlier = OffsetDateTime::now_utc() - time::Duration::hours(1);

        db.add_encrypt_key(user.id, &key, "newer", "b", None)
            .await
            .unwrap();
        db.add_encrypt_key(user.id, &key, "older", "a", Some(earlier))
            .await
            .unwrap();

        let ids: Vec<_> = db
            .encrypt_keys_for(&key)
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.global_id)
            .collect();
        assert_eq!(ids, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn test_key_must_belong_to_user() {
        let db = Database::in_memory().await.unwrap();
        let (mine, theirs) = (new_key(), new_key());
        let me = db.user_for_key(&mine, true).await.unwrap();
        db.user_for_key(&theirs, true).await.unwrap();

        assert!(matches!(
            db.add_encrypt_key(me.id, &theirs, "k", "c", None).await,
            Err(StoreError::KeyNotLinked)
        ));
    }
}
