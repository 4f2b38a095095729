//! Invite-code queries

use crate::error::Result;

use super::Store;

impl Store {
    /// Atomically consume one use of an invite code
    ///
    /// Returns false when the code does not exist or has no uses left; the
    /// decrement and the check happen in a single statement so concurrent
    /// signups cannot overdraw a code.
    pub async fn consume_invite(&self, code: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE invites SET uses_remaining = uses_remaining - 1 \
             WHERE code = $1 AND uses_remaining > 0",
        )
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
