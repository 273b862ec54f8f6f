use sqlx::Row;

use common::crypto::AuthorizedKey;

use super::models::{now, KeyRecord};
use super::{Database, StoreError};

impl Database {
    /// Attach `key` to the account. Linking a key the account already holds is a no-op.
    pub async fn link_key(&self, user_id: i64, key: &AuthorizedKey) -> Result<(), StoreError> {
        let key_str = key.to_authorized();
        let mut tx = self.begin_write().await?;

        sqlx::query(
            r#"
            INSERT INTO public_key (user_id, public_key, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (public_key) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&key_str)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let owner: i64 = sqlx::query("SELECT user_id FROM public_key WHERE public_key = ?1")
            .bind(&key_str)
            .fetch_one(&mut *tx)
            .await?
            .try_get("user_id")?;
        if owner != user_id {
            return Err(StoreError::KeyOwnedElsewhere);
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove `key` from the account, deleting the account with its last key.
    pub async fn unlink_key(&self, user_id: i64, key: &AuthorizedKey) -> Result<(), StoreError> {
        let mut tx = self.begin_write().await?;

        let removed = sqlx::query("DELETE FROM public_key WHERE user_id = ?1 AND public_key = ?2")
            .bind(user_id)
            .bind(key.to_authorized())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(StoreError::CouldNotUnlinkKey);
        }

        let remaining: i64 = sqlx::query("SELECT COUNT(*) AS n FROM public_key WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?
            .try_get("n")?;
        if remaining == 0 {
            sqlx::query("DELETE FROM charm_user WHERE id = ?1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(user_id, "last key unlinked, account deleted");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Keys of the account, oldest first.
    pub async fn keys_for_user(&self, user_id: i64) -> Result<Vec<KeyRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, public_key, created_at
            FROM public_key
            WHERE user_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&**self)
        .await?;

        rows.iter()
            .map(|row| KeyRecord::from_row(row).map_err(StoreError::from))
            .collect()
    }
}
