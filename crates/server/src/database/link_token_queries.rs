use sqlx::Row;

use super::models::now;
use super::{is_unique_violation, Database, StoreError};

impl Database {
    /// Persist a link token for `user_id`. Returns `false` if the pin is already in use.
    pub async fn create_link_token(&self, pin: &str, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO link_token (pin, user_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(pin)
        .bind(user_id)
        .bind(now())
        .execute(&**self)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Owner of a live token.
    pub async fn link_token_owner(&self, pin: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM link_token WHERE pin = ?1")
            .bind(pin)
            .fetch_optional(&**self)
            .await?;
        Ok(row.map(|r| r.try_get("user_id")).transpose()?)
    }

    pub async fn delete_link_token(&self, pin: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM link_token WHERE pin = ?1")
            .bind(pin)
            .execute(&**self)
            .await?;
        Ok(())
    }

    /// Drop tokens created more than `max_age_secs` ago.
    pub async fn purge_link_tokens(&self, max_age_secs: i64) -> Result<u64, StoreError> {
        let purged = sqlx::query("DELETE FROM link_token WHERE created_at < ?1")
            .bind(now() - max_age_secs)
            .execute(&**self)
            .await?
            .rows_affected();
        Ok(purged)
    }
}
