//! Authentication endpoints
//!
//! Thin translation between the HTTP boundary and the auth engine; every
//! decision lives in [`crate::auth::flow`].

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::auth::flow::{
    AuthResponse, ChallengeResponse, LoginFinishRequest, LoginStartRequest,
    PasswordChangeRequest, ReauthStartRequest, SignupRequest,
};
use crate::error::{Error, Result};
use crate::middleware::auth::stepup_token;
use crate::middleware::RequireUser;
use crate::state::AppState;
use crate::store::User;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(state.auth().signup(req).await?))
}

pub async fn login_start(
    State(state): State<AppState>,
    Json(req): Json<LoginStartRequest>,
) -> Result<Json<ChallengeResponse>> {
    Ok(Json(state.auth().login_start(req).await?))
}

pub async fn login_finish(
    State(state): State<AppState>,
    Json(req): Json<LoginFinishRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(state.auth().login_finish(req).await?))
}

pub async fn reauth_start(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(req): Json<ReauthStartRequest>,
) -> Result<Json<ChallengeResponse>> {
    Ok(Json(state.auth().reauth_start(&user, req).await?))
}

pub async fn reauth_finish(
    State(state): State<AppState>,
    Json(req): Json<LoginFinishRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(state.auth().reauth_finish(req).await?))
}

pub async fn password_change(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    headers: HeaderMap,
    Json(req): Json<PasswordChangeRequest>,
) -> Result<StatusCode> {
    state
        .auth()
        .change_password(&user, stepup_token(&headers), req)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    headers: HeaderMap,
) -> Result<StatusCode> {
    state
        .auth()
        .logout_all(&user, stepup_token(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<User>> {
    let user = state
        .store()
        .user_by_id(user.user_id)
        .await?
        .ok_or(Error::Unauthorized)?;
    Ok(Json(user))
}
