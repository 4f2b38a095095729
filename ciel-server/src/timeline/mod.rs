//! Timeline engine
//!
//! The global feed is reverse-chronological with keyset pagination. Listing
//! prefers the cache's sorted-set index (`timeline:global`, score = creation
//! time in milliseconds, member = post id) and falls back to a database
//! cursor scan whenever the cache is absent or unreachable — the operation
//! stays correct under any cache state, including empty.
//!
//! Ordering is by the `(score, id)` tuple descending. The sorted set alone
//! cannot express the tuple order at equal scores, so a filter pass drops
//! members at the cursor's score whose id does not strictly precede the
//! cursor's id.

pub mod cursor;

pub use cursor::Cursor;

use std::ops::DerefMut;

use deadpool_redis::Pool as RedisPool;
use serde::Serialize;
use uuid::Uuid;

use crate::cache;
use crate::error::{Error, Result};
use crate::store::{PostView, Store};

/// Sorted-set key for the global feed index
pub const TIMELINE_KEY: &str = "timeline:global";

/// One page of the feed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub items: Vec<PostView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Cursor-paginated global feed with cache-assisted listing
#[derive(Clone)]
pub struct TimelineEngine {
    store: Store,
    redis: Option<RedisPool>,
}

impl TimelineEngine {
    pub fn new(store: Store, redis: Option<RedisPool>) -> Self {
        Self { store, redis }
    }

    /// List one page, newest first
    ///
    /// `limit` must already be validated to `1..=100` by the caller.
    pub async fn list(&self, limit: usize, cursor: Option<Cursor>) -> Result<TimelinePage> {
        if let Some(pool) = &self.redis {
            if let Some(ids) = self.cached_ids(pool, limit, cursor).await {
                // Posts deleted since the index entry was written fall out
                // here: the batch load only returns live rows.
                let posts = self.store.posts_by_ids(&ids).await?;
                return Ok(assemble_page(posts, limit));
            }
        }

        let before = match cursor {
            Some(c) => Some((c.timestamp()?, c.id)),
            None => None,
        };
        let posts = self.store.timeline_page(before, (limit + 1) as i64).await?;
        Ok(assemble_page(posts, limit))
    }

    /// Query the sorted-set index; `None` means "use the database fallback"
    async fn cached_ids(
        &self,
        pool: &RedisPool,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Option<Vec<Uuid>> {
        let fetch = (limit + 1) as i64;

        let result: Result<Vec<String>> = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;

            match cursor {
                None => {
                    let members: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
                        .arg(TIMELINE_KEY)
                        .arg("+inf")
                        .arg("-inf")
                        .arg("LIMIT")
                        .arg(0)
                        .arg(fetch)
                        .query_async(conn.deref_mut())
                        .await
                        .map_err(Error::from)?;
                    Ok(members)
                }
                Some(cursor) => {
                    // Members tied with the cursor's score, newest-id first;
                    // the tuple filter keeps only those past the cursor.
                    let ties: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
                        .arg(TIMELINE_KEY)
                        .arg(cursor.score)
                        .arg(cursor.score)
                        .query_async(conn.deref_mut())
                        .await
                        .map_err(Error::from)?;

                    // Everything strictly below the cursor's score.
                    let rest: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
                        .arg(TIMELINE_KEY)
                        .arg(format!("({}", cursor.score))
                        .arg("-inf")
                        .arg("LIMIT")
                        .arg(0)
                        .arg(fetch)
                        .query_async(conn.deref_mut())
                        .await
                        .map_err(Error::from)?;

                    let mut members = filter_ties(ties, &cursor);
                    members.extend(rest);
                    members.truncate(fetch as usize);
                    Ok(members)
                }
            }
        })
        .await;

        match result {
            Ok(members) => Some(
                members
                    .iter()
                    .filter_map(|m| Uuid::parse_str(m).ok())
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "timeline index unavailable, using store fallback");
                None
            }
        }
    }

    /// Add a post to the feed index (post-create path)
    ///
    /// Best-effort: the index may lag, listing stays correct regardless.
    pub async fn index_add(&self, post: &PostView) {
        let Some(pool) = &self.redis else { return };

        let id = post.id.to_string();
        let score = post.score();
        let result = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;
            redis::cmd("ZADD")
                .arg(TIMELINE_KEY)
                .arg(score)
                .arg(&id)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(post = %id, error = %e, "failed to index post");
        }
    }

    /// Remove a post from the feed index (post-delete path)
    pub async fn index_remove(&self, post_id: Uuid) {
        let Some(pool) = &self.redis else { return };

        let id = post_id.to_string();
        let result = cache::with_data_timeout(async {
            let mut conn = pool.get().await.map_err(Error::from)?;
            redis::cmd("ZREM")
                .arg(TIMELINE_KEY)
                .arg(&id)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(post = %id, error = %e, "failed to deindex post");
        }
    }
}

/// Keep only same-score members strictly past the cursor in tuple order
///
/// Input arrives newest-id first (the sorted set returns equal-score members
/// in reverse lexicographic order); survivors are members whose id precedes
/// the cursor id lexicographically.
fn filter_ties(ties_desc: Vec<String>, cursor: &Cursor) -> Vec<String> {
    let cursor_id = cursor.id.to_string();
    ties_desc
        .into_iter()
        .filter(|member| member.as_str() < cursor_id.as_str())
        .collect()
}

/// Turn up to `limit + 1` surviving posts into a page
///
/// The extra post only signals that more exist; the emitted cursor is the
/// last *returned* post, so the follow-up page's strict tuple comparison
/// resumes exactly where this one ended.
fn assemble_page(mut posts: Vec<PostView>, limit: usize) -> TimelinePage {
    let has_more = posts.len() > limit;
    posts.truncate(limit);

    let next_cursor = if has_more {
        posts
            .last()
            .map(|last| Cursor::new(last.score(), last.id).encode())
    } else {
        None
    };

    TimelinePage {
        items: posts,
        next_cursor,
    }
}
