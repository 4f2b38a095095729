//! Timeline and post endpoints
//!
//! Post create/delete pair every store mutation with timeline-index
//! maintenance and a realtime publish. The publish happens after commit,
//! never before, and its failure never fails the request.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::middleware::RequireUser;
use crate::realtime::TimelineEvent;
use crate::state::AppState;
use crate::store::PostView;
use crate::timeline::{Cursor, TimelinePage};

/// Default page size when the client does not ask for one
const DEFAULT_LIMIT: usize = 30;

/// Largest accepted post body, in characters
const MAX_CONTENT_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Validate a page limit into `1..=100`
pub(crate) fn validate_limit(limit: Option<usize>) -> Result<usize> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=100).contains(&limit) {
        return Err(Error::InvalidRequest(
            "limit must be between 1 and 100".to_string(),
        ));
    }
    Ok(limit)
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<TimelinePage>> {
    let limit = validate_limit(query.limit)?;
    let cursor = query
        .cursor
        .as_deref()
        .map(Cursor::decode)
        .transpose()?;

    Ok(Json(state.timeline().list(limit, cursor).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

pub async fn create_post(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostView>)> {
    let content = req.content.trim();
    if content.is_empty() || content.chars().count() > MAX_CONTENT_CHARS {
        return Err(Error::InvalidRequest(format!(
            "content must be 1-{} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let post = state.store().create_post(user.user_id, content).await?;

    state.timeline().index_add(&post).await;
    if let Err(e) = state
        .hub()
        .publish(TimelineEvent::PostCreated { post: post.clone() })
        .await
    {
        tracing::warn!(post = %post.id, error = %e, "failed to publish post_created");
    }

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store().soft_delete_post(id, user.user_id).await? {
        return Err(Error::NotFound("post not found".to_string()));
    }

    state.timeline().index_remove(id).await;
    if let Err(e) = state
        .hub()
        .publish(TimelineEvent::PostDeleted { post_id: id })
        .await
    {
        tracing::warn!(post = %id, error = %e, "failed to publish post_deleted");
    }

    Ok(StatusCode::NO_CONTENT)
}
