//! Reaction endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::middleware::{MaybeUser, RequireUser};
use crate::reactions::{ReactionUsersPage, ReactionsResponse};
use crate::state::AppState;
use crate::timeline::Cursor;

use super::timeline::validate_limit;

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

pub async fn add(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(post_id): Path<Uuid>,
    Json(req): Json<ReactRequest>,
) -> Result<Json<ReactionsResponse>> {
    Ok(Json(
        state.reactions().add(&user, post_id, &req.emoji).await?,
    ))
}

pub async fn remove(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path((post_id, emoji)): Path<(Uuid, String)>,
) -> Result<Json<ReactionsResponse>> {
    Ok(Json(
        state.reactions().remove(&user, post_id, &emoji).await?,
    ))
}

pub async fn list(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ReactionsResponse>> {
    let viewer = viewer.map(|u| u.user_id);
    Ok(Json(state.reactions().list(post_id, viewer).await?))
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Path((post_id, emoji)): Path<(Uuid, String)>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<ReactionUsersPage>> {
    let limit = validate_limit(query.limit)?;
    let cursor = query
        .cursor
        .as_deref()
        .map(Cursor::decode)
        .transpose()?;

    Ok(Json(
        state
            .reactions()
            .list_users(post_id, &emoji, limit, cursor)
            .await?,
    ))
}
