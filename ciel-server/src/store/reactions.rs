//! Reaction event and counter queries
//!
//! The mutating statements take a `PgExecutor` so the reactions engine can
//! run them inside one transaction: the event insert/delete and the counter
//! adjustment commit or roll back together.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::models::{ReactionCount, ReactionUser};
use super::users::is_unique_violation;
use super::Store;

/// Insert a reaction event
///
/// A duplicate `(user, post, emoji)` surfaces as `AlreadyReacted`, distinct
/// from any storage error, so clients can reconcile optimistic UI state.
pub async fn insert_reaction<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    post_id: Uuid,
    emoji: &str,
    reacted_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "INSERT INTO reactions (user_id, post_id, emoji, reacted_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(post_id)
    .bind(emoji)
    .bind(reacted_at)
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(Error::AlreadyReacted),
        Err(e) => Err(e.into()),
    }
}

/// Delete a reaction event, returning the number of rows removed
pub async fn delete_reaction<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    post_id: Uuid,
    emoji: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM reactions WHERE user_id = $1 AND post_id = $2 AND emoji = $3",
    )
    .bind(user_id)
    .bind(post_id)
    .bind(emoji)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Upsert-increment the `(post, emoji)` counter
pub async fn increment_count<'e>(
    executor: impl PgExecutor<'e>,
    post_id: Uuid,
    emoji: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reaction_counts (post_id, emoji, count) VALUES ($1, $2, 1) \
         ON CONFLICT (post_id, emoji) DO UPDATE SET count = reaction_counts.count + 1",
    )
    .bind(post_id)
    .bind(emoji)
    .execute(executor)
    .await?;
    Ok(())
}

/// Decrement the `(post, emoji)` counter
pub async fn decrement_count<'e>(
    executor: impl PgExecutor<'e>,
    post_id: Uuid,
    emoji: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE reaction_counts SET count = count - 1 WHERE post_id = $1 AND emoji = $2",
    )
    .bind(post_id)
    .bind(emoji)
    .execute(executor)
    .await?;
    Ok(())
}

/// Remove counter rows that reached zero; row absence means count = 0
pub async fn prune_zero_counts<'e>(
    executor: impl PgExecutor<'e>,
    post_id: Uuid,
    emoji: &str,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM reaction_counts WHERE post_id = $1 AND emoji = $2 AND count <= 0",
    )
    .bind(post_id)
    .bind(emoji)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct ReactionCountRow {
    emoji: String,
    count: i64,
    reacted: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ReactionUserRow {
    user_id: Uuid,
    username: String,
    reacted_at: DateTime<Utc>,
}

impl Store {
    /// Aggregate counts for a post, with the viewer overlay when present
    ///
    /// The overlay is computed per-row; an absent viewer pins it to false so
    /// the result is safe to cache for anonymous requests.
    pub async fn reaction_counts(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<Vec<ReactionCount>> {
        let rows = sqlx::query_as::<_, ReactionCountRow>(
            "SELECT rc.emoji, rc.count, \
             CASE WHEN $2::uuid IS NULL THEN false \
                  ELSE EXISTS (SELECT 1 FROM reactions r \
                               WHERE r.post_id = rc.post_id \
                                 AND r.emoji = rc.emoji \
                                 AND r.user_id = $2) \
             END AS reacted \
             FROM reaction_counts rc WHERE rc.post_id = $1 \
             ORDER BY rc.emoji",
        )
        .bind(post_id)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ReactionCount {
                emoji: r.emoji,
                count: r.count,
                reacted_by_current_user: r.reacted,
            })
            .collect())
    }

    /// Keyset-paginated users who reacted with an emoji, newest first
    ///
    /// Ordering is `(reacted_at DESC, user_id DESC)`; the cursor tuple is
    /// strict, so a page never repeats its predecessor's rows.
    pub async fn reaction_users_page(
        &self,
        post_id: Uuid,
        emoji: &str,
        before: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ReactionUser>> {
        let rows = match before {
            Some((cursor_time, cursor_id)) => {
                sqlx::query_as::<_, ReactionUserRow>(
                    "SELECT r.user_id, u.username, r.reacted_at \
                     FROM reactions r JOIN users u ON u.id = r.user_id \
                     WHERE r.post_id = $1 AND r.emoji = $2 \
                       AND (r.reacted_at, r.user_id) < ($3, $4) \
                     ORDER BY r.reacted_at DESC, r.user_id DESC LIMIT $5",
                )
                .bind(post_id)
                .bind(emoji)
                .bind(cursor_time)
                .bind(cursor_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ReactionUserRow>(
                    "SELECT r.user_id, u.username, r.reacted_at \
                     FROM reactions r JOIN users u ON u.id = r.user_id \
                     WHERE r.post_id = $1 AND r.emoji = $2 \
                     ORDER BY r.reacted_at DESC, r.user_id DESC LIMIT $3",
                )
                .bind(post_id)
                .bind(emoji)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|r| ReactionUser {
                user_id: r.user_id,
                username: r.username,
                reacted_at: r.reacted_at,
            })
            .collect())
    }
}
