//! Reactions engine
//!
//! One reaction per `(user, post, emoji)`, enforced by the store's unique
//! constraint; the per-post counter moves in the same transaction as the
//! event row, so the two can never drift. A counter row that reaches zero is
//! deleted — absence means zero.
//!
//! Anonymous listings are cached (`reactions:post:{postId}`, 6 h); listings
//! with a viewer always hit the store because the reacted-by-viewer overlay
//! is viewer-specific and must never be cached.
//!
//! Mutations publish a `reaction_updated` event after commit, best-effort: a
//! publish failure is logged, never rolled back into the request.

use std::ops::DerefMut;

use chrono::Utc;
use deadpool_redis::Pool as RedisPool;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cache;
use crate::error::{Error, Result};
use crate::realtime::{HubHandle, ReactionCounts, TimelineEvent};
use crate::store::{self, ReactionCount, ReactionUser, Store};
use crate::timeline::Cursor;

/// Anonymous reaction-list cache lifetime (6 hours)
pub const ANON_CACHE_TTL_SECS: u64 = 21_600;

/// Upper bound on emoji length in bytes
const MAX_EMOJI_BYTES: usize = 64;

/// Reactions for one post, as served to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionsResponse {
    pub post_id: Uuid,
    pub reactions: Vec<ReactionCount>,
}

/// One page of users behind a reaction
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUsersPage {
    pub items: Vec<ReactionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Atomic reaction mutations plus cached listings
#[derive(Clone)]
pub struct ReactionsEngine {
    store: Store,
    redis: Option<RedisPool>,
    hub: HubHandle,
}

impl ReactionsEngine {
    pub fn new(store: Store, redis: Option<RedisPool>, hub: HubHandle) -> Self {
        Self { store, redis, hub }
    }

    /// List reaction counts for a post
    ///
    /// Anonymous requests may be served from the cache; a viewer always gets
    /// a fresh read with their overlay.
    pub async fn list(&self, post_id: Uuid, viewer: Option<Uuid>) -> Result<ReactionsResponse> {
        self.require_live_post(post_id).await?;

        if viewer.is_none() {
            if let Some(cached) = self.cached_counts(post_id).await {
                return Ok(ReactionsResponse {
                    post_id,
                    reactions: cached,
                });
            }
        }

        let counts = self.store.reaction_counts(post_id, viewer).await?;

        if viewer.is_none() {
            self.prime_cache(post_id, &counts).await;
        }

        Ok(ReactionsResponse {
            post_id,
            reactions: counts,
        })
    }

    /// List users who reacted with an emoji, newest reaction first
    ///
    /// `limit` must already be validated to `1..=100` by the caller.
    pub async fn list_users(
        &self,
        post_id: Uuid,
        emoji: &str,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<ReactionUsersPage> {
        validate_emoji(emoji)?;
        self.require_live_post(post_id).await?;

        let before = match cursor {
            Some(c) => Some((c.timestamp()?, c.id)),
            None => None,
        };

        let items = self
            .store
            .reaction_users_page(post_id, emoji, before, limit as i64)
            .await?;

        // A full batch means there may be more; the cursor is the last
        // returned row.
        let next_cursor = if items.len() == limit {
            items
                .last()
                .map(|last| Cursor::new(last.reacted_at.timestamp_millis(), last.user_id).encode())
        } else {
            None
        };

        Ok(ReactionUsersPage { items, next_cursor })
    }

    /// Add a reaction; duplicate attempts surface as `already_reacted`
    pub async fn add(
        &self,
        user: &AuthUser,
        post_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionsResponse> {
        validate_emoji(emoji)?;
        self.require_live_post(post_id).await?;

        let mut tx = self.store.pool().begin().await?;
        store::insert_reaction(&mut *tx, user.user_id, post_id, emoji, Utc::now()).await?;
        store::increment_count(&mut *tx, post_id, emoji).await?;
        tx.commit().await?;

        self.after_mutation(post_id, Some(user.user_id)).await
    }

    /// Remove a reaction; a missing row surfaces as `not_found`
    pub async fn remove(
        &self,
        user: &AuthUser,
        post_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionsResponse> {
        validate_emoji(emoji)?;
        self.require_live_post(post_id).await?;

        let mut tx = self.store.pool().begin().await?;
        let removed = store::delete_reaction(&mut *tx, user.user_id, post_id, emoji).await?;
        if removed == 0 {
            // Dropping the transaction rolls it back.
            return Err(Error::NotFound("reaction not found".to_string()));
        }
        store::decrement_count(&mut *tx, post_id, emoji).await?;
        store::prune_zero_counts(&mut *tx, post_id, emoji).await?;
        tx.commit().await?;

        self.after_mutation(post_id, Some(user.user_id)).await
    }

    /// Post-commit work shared by add and remove: drop the anonymous cache,
    /// rebuild counts, publish the update
    async fn after_mutation(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<ReactionsResponse> {
        self.invalidate_cache(post_id).await;

        // Anonymous counts feed the broadcast and re-prime the cache; the
        // caller's response carries their overlay.
        let anon = self.store.reaction_counts(post_id, None).await?;
        self.prime_cache(post_id, &anon).await;

        let event = TimelineEvent::ReactionUpdated {
            reaction_counts: ReactionCounts {
                post_id,
                counts: anon,
            },
        };
        if let Err(e) = self.hub.publish(event).await {
            tracing::warn!(post = %post_id, error = %e, "failed to publish reaction update");
        }

        let reactions = self.store.reaction_counts(post_id, viewer).await?;
        Ok(ReactionsResponse { post_id, reactions })
    }

    async fn require_live_post(&self, post_id: Uuid) -> Result<()> {
        match self.store.post_by_id(post_id).await? {
            Some(post) if post.deleted_at.is_none() => Ok(()),
            _ => Err(Error::NotFound("post not found".to_string())),
        }
    }

    async fn cached_counts(&self, post_id: Uuid) -> Option<Vec<ReactionCount>> {
        let pool = self.redis.as_ref()?;
        let key = anon_cache_key(post_id);

        let raw: String = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;
            redis::cmd("GET")
                .arg(&key)
                .query_async(conn.deref_mut())
                .await
                .map_err(Error::from)
        })
        .await
        .ok()
        .flatten()?;

        serde_json::from_str(&raw).ok()
    }

    async fn prime_cache(&self, post_id: Uuid, counts: &[ReactionCount]) {
        let Some(pool) = &self.redis else { return };
        let Ok(value) = serde_json::to_string(counts) else {
            return;
        };
        let key = anon_cache_key(post_id);

        let result = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;
            redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("EX")
                .arg(ANON_CACHE_TTL_SECS)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(post = %post_id, error = %e, "failed to prime reaction cache");
        }
    }

    async fn invalidate_cache(&self, post_id: Uuid) {
        let Some(pool) = &self.redis else { return };
        let key = anon_cache_key(post_id);

        let result = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(post = %post_id, error = %e, "failed to invalidate reaction cache");
        }
    }
}

fn anon_cache_key(post_id: Uuid) -> String {
    format!("reactions:post:{}", post_id)
}

/// Emoji sanity: non-empty, bounded, no whitespace or control characters
fn validate_emoji(emoji: &str) -> Result<()> {
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
        return Err(Error::InvalidRequest("invalid emoji".to_string()));
    }
    if emoji.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidRequest("invalid emoji".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_validation() {
        assert!(validate_emoji("🔥").is_ok());
        assert!(validate_emoji("👍🏽").is_ok());
        assert!(validate_emoji(":custom_emote:").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("has space").is_err());
        assert!(validate_emoji("ctrl\u{7}").is_err());
        assert!(validate_emoji(&"x".repeat(100)).is_err());
    }

    #[test]
    fn anon_cache_key_layout() {
        let id = Uuid::parse_str("7b0448e4-08f8-4f6f-9a3b-6a1d0a6b8a11").unwrap();
        assert_eq!(
            anon_cache_key(id),
            "reactions:post:7b0448e4-08f8-4f6f-9a3b-6a1d0a6b8a11"
        );
    }

    #[test]
    fn cached_payload_never_carries_viewer_overlay() {
        // What goes into the cache is anonymous counts: overlay pinned false.
        let counts = vec![ReactionCount {
            emoji: "🔥".to_string(),
            count: 2,
            reacted_by_current_user: false,
        }];
        let json = serde_json::to_string(&counts).unwrap();
        let back: Vec<ReactionCount> = serde_json::from_str(&json).unwrap();
        assert!(back.iter().all(|c| !c.reacted_by_current_user));
    }
}
