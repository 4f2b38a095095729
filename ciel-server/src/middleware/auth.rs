//! Bearer authentication middleware and extractors
//!
//! The guard layer may already have resolved the request identity (it needs
//! it for user-keyed deny and limit checks); this middleware reuses that
//! resolution when present. A supplied-but-invalid token is refused even on
//! routes that would also accept anonymous requests.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use http::HeaderName;

use crate::auth::{AuthUser, TokenKind};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Header carrying the step-up token for sensitive mutations
pub const STEPUP_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-stepup-token");

/// Extract the bearer token from the Authorization header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Resolve the request identity from the Authorization header
///
/// Inserts an [`AuthUser`] extension on success. Requests without an
/// Authorization header pass through anonymous; handlers that require a user
/// enforce that through the extractor.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    if request.extensions().get::<AuthUser>().is_some() {
        // The guard layer already verified the token.
        return Ok(next.run(request).await);
    }

    if let Some(token) = extract_bearer(request.headers()) {
        let user = state.tokens().parse(token, TokenKind::Access).await?;
        request.extensions_mut().insert(user);
    }

    Ok(next.run(request).await)
}

/// Extractor for handlers that require an authenticated user
///
/// Yields the opaque 401 when the request carried no (valid) token.
pub struct RequireUser(pub AuthUser);

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(RequireUser)
            .ok_or(Error::Unauthorized)
    }
}

/// Extractor for handlers with viewer-optional behavior
pub struct MaybeUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}

/// Read the step-up token header, if any
pub fn stepup_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&STEPUP_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
}
