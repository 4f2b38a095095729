//! HTTP handlers and router assembly
//!
//! Layer order on the way in: guard (deny + rate limit) first, then bearer
//! authentication, then the handler. Health probes classify as excluded and
//! sail through both guards.

pub mod auth;
pub mod reactions;
pub mod timeline;
pub mod ws;

use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::health;
use crate::middleware as mw;
use crate::state::AppState;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the application router with all middleware attached
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::health))
        .route("/readyz", get(health::readiness))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login/start", post(auth::login_start))
        .route("/auth/login/finish", post(auth::login_finish))
        .route("/auth/reauth/start", post(auth::reauth_start))
        .route("/auth/reauth/finish", post(auth::reauth_finish))
        .route("/auth/password/change", post(auth::password_change))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/me", get(auth::me))
        .route("/timeline", get(timeline::list))
        .route("/posts", post(timeline::create_post))
        .route("/posts/{id}", delete(timeline::delete_post))
        .route("/posts/{id}/react", post(reactions::add))
        .route("/posts/{id}/react/{emoji}", delete(reactions::remove))
        .route("/posts/{id}/reactions", get(reactions::list))
        .route(
            "/posts/{id}/reactions/{emoji}/users",
            get(reactions::list_users),
        )
        .route("/ws/timeline", get(ws::timeline_socket))
        // ServiceBuilder applies top-down: tracing outermost, then panic
        // recovery, deadlines, body cap, the guards, and finally bearer
        // authentication closest to the handlers.
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    state.config().service.timeout_secs,
                )))
                .layer(from_fn_with_state(state.clone(), mw::guard))
                .layer(from_fn_with_state(state.clone(), mw::authenticate))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
