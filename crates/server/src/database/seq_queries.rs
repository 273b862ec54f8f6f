use sqlx::Row;

use super::{Database, StoreError};

impl Database {
    /// Current value of the `(user, name)` counter, starting it at 1 if unseen.
    pub async fn get_seq(&self, user_id: i64, name: &str) -> Result<u64, StoreError> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            r#"
            INSERT INTO named_seq (user_id, name, seq) VALUES (?1, ?2, 1)
            ON CONFLICT (user_id, name) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        let seq: i64 = sqlx::query("SELECT seq FROM named_seq WHERE user_id = ?1 AND name = ?2")
            .bind(user_id)
            .bind(name)
            .fetch_one(&mut *tx)
            .await?
            .try_get("seq")?;

        tx.commit().await?;
        Ok(seq as u64)
    }

    /// Increment the counter by exactly one and return the new value.
    pub async fn next_seq(&self, user_id: i64, name: &str) -> Result<u64, StoreError> {
        let seq: i64 = sqlx::query(
            r#"
            INSERT INTO named_seq (user_id, name, seq) VALUES (?1, ?2, 1)
            ON CONFLICT (user_id, name) DO UPDATE SET seq = seq + 1
            RETURNING seq
            "#,
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&**self)
        .await?
        .try_get("seq")?;

        Ok(seq as u64)
    }
}
