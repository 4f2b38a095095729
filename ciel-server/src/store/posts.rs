//! Post queries

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::Result;

use super::models::{Post, PostView, UserRef};
use super::Store;

/// Post joined with its author
#[derive(Debug, FromRow)]
struct PostAuthorRow {
    id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    author_id: Uuid,
    author_username: String,
}

impl From<PostAuthorRow> for PostView {
    fn from(row: PostAuthorRow) -> Self {
        PostView {
            id: row.id,
            author: UserRef {
                id: row.author_id,
                username: row.author_username,
            },
            content: row.content,
            created_at: row.created_at,
        }
    }
}

const POST_SELECT: &str = "SELECT p.id, p.content, p.created_at, \
     u.id AS author_id, u.username AS author_username \
     FROM posts p JOIN users u ON u.id = p.author_id";

impl Store {
    /// Fetch a raw post row, deleted or not
    pub async fn post_by_id(&self, id: Uuid) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            "SELECT id, author_id, content, created_at, deleted_at FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }

    /// Insert a post and return it joined with its author
    pub async fn create_post(&self, author_id: Uuid, content: &str) -> Result<PostView> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO posts (id, author_id, content, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(author_id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let sql = format!("{} WHERE p.id = $1", POST_SELECT);
        let row = sqlx::query_as::<_, PostAuthorRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    /// Soft-delete a post owned by the given author
    ///
    /// Returns false when the post does not exist, is already deleted, or is
    /// not owned by the author.
    pub async fn soft_delete_post(&self, id: Uuid, author_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET deleted_at = $3 \
             WHERE id = $1 AND author_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(author_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Load live posts for the given ids, preserving the input order
    ///
    /// Ids that are missing or soft-deleted are simply absent from the
    /// result; the caller treats that as a filter.
    pub async fn posts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<PostView>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("{} WHERE p.id = ANY($1) AND p.deleted_at IS NULL", POST_SELECT);
        let rows = sqlx::query_as::<_, PostAuthorRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_id: HashMap<Uuid, PostView> =
            rows.into_iter().map(|r| (r.id, r.into())).collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Keyset-paginated timeline scan, newest first
    ///
    /// When a cursor tuple is present, only rows strictly before it in
    /// `(created_at, id)` descending order are returned.
    pub async fn timeline_page(
        &self,
        before: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<PostView>> {
        let rows = match before {
            Some((cursor_time, cursor_id)) => {
                let sql = format!(
                    "{} WHERE p.deleted_at IS NULL \
                     AND (p.created_at, p.id) < ($1, $2) \
                     ORDER BY p.created_at DESC, p.id DESC LIMIT $3",
                    POST_SELECT
                );
                sqlx::query_as::<_, PostAuthorRow>(&sql)
                    .bind(cursor_time)
                    .bind(cursor_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "{} WHERE p.deleted_at IS NULL \
                     ORDER BY p.created_at DESC, p.id DESC LIMIT $1",
                    POST_SELECT
                );
                sqlx::query_as::<_, PostAuthorRow>(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(PostView::from).collect())
    }
}
