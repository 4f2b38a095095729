//! Realtime socket endpoint
//!
//! The upgrade handshake authenticates with the same bearer tokens as the
//! HTTP middleware, supplied either as the `ciel_auth` cookie or a `token`
//! query parameter (browsers cannot set headers on websocket upgrades).

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::Response,
};
use serde::Deserialize;

use crate::auth::TokenKind;
use crate::error::{Error, Result};
use crate::realtime::client::{serve_socket, MAX_READ_BYTES};
use crate::state::AppState;

/// Cookie carrying the access token for socket upgrades
pub const AUTH_COOKIE: &str = "ciel_auth";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn timeline_socket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<Response> {
    let token = query
        .token
        .clone()
        .or_else(|| cookie_token(&headers))
        .ok_or(Error::Unauthorized)?;

    // Reject before upgrading; after this point the connection speaks only
    // the realtime protocol.
    let user = state.tokens().parse(&token, TokenKind::Access).await?;
    tracing::debug!(user = %user.user_id, "realtime upgrade authenticated");

    let hub = state.hub().clone();
    Ok(ws
        .max_message_size(MAX_READ_BYTES)
        .on_upgrade(move |socket| serve_socket(socket, hub)))
}

/// Pull the auth cookie out of the Cookie header
fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == AUTH_COOKIE && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_parsing_finds_the_auth_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(cookie_token(&headers), None);

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; ciel_auth=tok123; lang=en"),
        );
        assert_eq!(cookie_token(&headers), Some("tok123".to_string()));
    }

    #[test]
    fn empty_cookie_value_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("ciel_auth="));
        assert_eq!(cookie_token(&headers), None);
    }
}
