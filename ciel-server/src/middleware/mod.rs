//! Request guards and authentication middleware
//!
//! The guard layer runs first on every request: classify the route, evaluate
//! the deny list, then the fixed-window rate limits. Identity, when a bearer
//! token is supplied, is resolved once here and reused by the authentication
//! layer downstream.

pub mod auth;
pub mod deny;
pub mod rate_limit;
pub mod route_class;

pub use auth::{authenticate, MaybeUser, RequireUser};
pub use route_class::{classify, RouteClass};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;

use crate::auth::{AuthUser, TokenKind};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Deny-list and rate-limit guard
///
/// Ordering per request: classification, deny checks (short-circuit 403),
/// rate limits (429). Health probes bypass everything. Cache trouble fails
/// open in both guards.
pub async fn guard(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let route = classify(request.method(), request.uri().path());
    if route.is_excluded() {
        return Ok(next.run(request).await);
    }
    let route = route.as_str();

    let ip = client_ip(&request);

    // Resolve identity once so user-keyed checks can see it. A token that
    // fails verification here is treated as anonymous; the authentication
    // layer makes the reject decision.
    let user: Option<AuthUser> = match auth::extract_bearer(request.headers()) {
        Some(token) => state.tokens().parse(token, TokenKind::Access).await.ok(),
        None => None,
    };
    if let Some(user) = &user {
        request.extensions_mut().insert(user.clone());
    }
    let user_id = user.as_ref().map(|u| u.user_id);

    if let Some(pool) = state.redis() {
        if deny::is_denied(pool, route, &ip, user_id).await {
            tracing::warn!(route = route, ip = %ip, "request denied by deny list");
            return Err(Error::Forbidden("access denied".to_string()));
        }

        rate_limit::check(pool, route, &ip, user_id, Utc::now().timestamp()).await?;
    }

    Ok(next.run(request).await)
}

/// Best-effort client IP: X-Forwarded-For first, then the socket address
fn client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
