use uuid::Uuid;

use common::crypto::AuthorizedKey;
use common::name::validate_name;

use super::models::{now, UserRecord};
use super::{is_unique_violation, Database, StoreError};

const USER_BY_KEY: &str = r#"
    SELECT u.id, u.charm_id, u.name, u.created_at
    FROM charm_user u
    INNER JOIN public_key pk ON pk.user_id = u.id
    WHERE pk.public_key = ?1
"#;

impl Database {
    /// Look up the account owning `key`, optionally creating one for a first-seen key.
    pub async fn user_for_key(
        &self,
        key: &AuthorizedKey,
        create: bool,
    ) -> Result<UserRecord, StoreError> {
        let key_str = key.to_authorized();

        if let Some(user) = self.find_user_for_key(&key_str).await? {
            return Ok(user);
        }
        if !create {
            return Err(StoreError::MissingUser);
        }

        let mut tx = self.begin_write().await?;
        let charm_id = Uuid::new_v4().to_string();
        let created_at = now();

        let user_id = sqlx::query("INSERT INTO charm_user (charm_id, created_at) VALUES (?1, ?2)")
            .bind(&charm_id)
            .bind(created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let inserted = sqlx::query(
            r#"
            INSERT INTO public_key (user_id, public_key, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (public_key) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&key_str)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // another session registered the key first
            tx.rollback().await?;
            return self
                .find_user_for_key(&key_str)
                .await?
                .ok_or(StoreError::MissingUser);
        }

        tx.commit().await?;
        tracing::info!(charm_id = %charm_id, "created account for new key");

        Ok(UserRecord {
            id: user_id,
            charm_id,
            name: None,
            created_at: super::models::timestamp(created_at),
        })
    }

    async fn find_user_for_key(&self, key: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(USER_BY_KEY)
            .bind(key)
            .fetch_optional(&**self)
            .await?;
        Ok(row.as_ref().map(UserRecord::from_row).transpose()?)
    }

    pub async fn user_by_charm_id(&self, charm_id: &str) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, charm_id, name, created_at FROM charm_user WHERE charm_id = ?1",
        )
        .bind(charm_id)
        .fetch_optional(&**self)
        .await?;

        match row {
            Some(row) => Ok(UserRecord::from_row(&row)?),
            None => Err(StoreError::MissingUser),
        }
    }

    /// Case-insensitive lookup by display name.
    pub async fn user_by_name(&self, name: &str) -> Result<UserRecord, StoreError> {
        let row =
            sqlx::query("SELECT id, charm_id, name, created_at FROM charm_user WHERE name = ?1")
                .bind(name)
                .fetch_optional(&**self)
                .await?;

        match row {
            Some(row) => Ok(UserRecord::from_row(&row)?),
            None => Err(StoreError::MissingUser),
        }
    }

    /// Claim `name` for the account. Re-claiming one's own name is a no-op.
    pub async fn set_user_name(&self, charm_id: &str, name: &str) -> Result<UserRecord, StoreError> {
        if !validate_name(name) {
            return Err(StoreError::NameInvalid);
        }

        let mut tx = self.begin_write().await?;

        let updated = sqlx::query(
            r#"
            UPDATE charm_user SET name = ?1
            WHERE charm_id = ?2
              AND NOT EXISTS (
                SELECT 1 FROM charm_user other
                WHERE other.name = ?1 AND other.charm_id != ?2
              )
            "#,
        )
        .bind(name)
        .bind(charm_id)
        .execute(&mut *tx)
        .await;

        let updated = match updated {
            Ok(result) => result.rows_affected(),
            Err(e) if is_unique_violation(&e) => return Err(StoreError::NameTaken),
            Err(e) => return Err(e.into()),
        };

        if updated == 0 {
            let exists = sqlx::query("SELECT 1 FROM charm_user WHERE charm_id = ?1")
                .bind(charm_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if exists {
                StoreError::NameTaken
            } else {
                StoreError::MissingUser
            });
        }

        let row = sqlx::query(
            "SELECT id, charm_id, name, created_at FROM charm_user WHERE charm_id = ?1",
        )
        .bind(charm_id)
        .fetch_one(&mut *tx)
        .await?;
        let user = UserRecord::from_row(&row)?;

        tx.commit().await?;
        Ok(user)
    }

    /// Fold `victim_id` into `survivor_id`.
    ///
    /// The victim's keys move to the survivor and the victim row is deleted.
    /// Ciphertexts sealed under the victim's ring are dropped; the linking
    /// client re-seals its ring afterwards. The survivor keeps its name.
    pub async fn merge_users(&self, survivor_id: i64, victim_id: i64) -> Result<(), StoreError> {
        if survivor_id == victim_id {
            return Ok(());
        }

        let mut tx = self.begin_write().await?;

        let survivor = sqlx::query("SELECT 1 FROM charm_user WHERE id = ?1")
            .bind(survivor_id)
            .fetch_optional(&mut *tx)
            .await?;
        if survivor.is_none() {
            return Err(StoreError::MissingUser);
        }

        sqlx::query(
            r#"
            DELETE FROM encrypt_key
            WHERE public_key_id IN (SELECT id FROM public_key WHERE user_id = ?1)
            "#,
        )
        .bind(victim_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE public_key SET user_id = ?1 WHERE user_id = ?2")
            .bind(survivor_id)
            .bind(victim_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM charm_user WHERE id = ?1")
            .bind(victim_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::MissingUser);
        }

        tx.commit().await?;
        tracing::info!(survivor_id, victim_id, "merged accounts");
        Ok(())
    }
}
