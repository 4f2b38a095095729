//! User and credential queries

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::models::{Credential, User};
use super::Store;

impl Store {
    /// Look up a user by username
    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Look up a user by id
    pub async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Fetch the stored verifier for a user
    pub async fn credential_for_user(&self, user_id: Uuid) -> Result<Option<Credential>> {
        let credential = sqlx::query_as::<_, Credential>(
            "SELECT user_id, salt, iterations, stored_key, server_key \
             FROM credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    /// Insert a user and their credential in one transaction
    ///
    /// A username collision surfaces as `Conflict`, not as a storage error.
    pub async fn create_user(
        &self,
        username: &str,
        salt: &[u8],
        iterations: u32,
        stored_key: &[u8],
        server_key: &[u8],
    ) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let insert = sqlx::query(
            "INSERT INTO users (id, username, created_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(username)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e) {
                return Err(Error::Conflict("username already taken".to_string()));
            }
            return Err(e.into());
        }

        sqlx::query(
            "INSERT INTO credentials (user_id, salt, iterations, stored_key, server_key) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(salt)
        .bind(iterations as i32)
        .bind(stored_key)
        .bind(server_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(User {
            id: user_id,
            username: username.to_string(),
            created_at: now,
        })
    }

    /// Overwrite a user's credential atomically (password change)
    pub async fn update_credential(
        &self,
        user_id: Uuid,
        salt: &[u8],
        iterations: u32,
        stored_key: &[u8],
        server_key: &[u8],
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE credentials \
             SET salt = $2, iterations = $3, stored_key = $4, server_key = $5 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(salt)
        .bind(iterations as i32)
        .bind(stored_key)
        .bind(server_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("credential not found".to_string()));
        }
        Ok(())
    }
}

/// Detect a unique-constraint violation in a sqlx error
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
