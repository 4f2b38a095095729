//! # ciel-server
//!
//! Backend for the ciel social posting service: challenge-response
//! authentication with short-lived bearer tokens, a reverse-chronological
//! timeline, realtime fan-out over websockets, and deny-list / rate-limit
//! guards in front of everything.
//!
//! ## Architecture
//!
//! - [`auth`] — SCRAM-SHA-256-style login and step-up flows, token
//!   issuance/revocation, challenge-session storage
//! - [`middleware`] — route classification, deny lists, fixed-window rate
//!   limits, bearer authentication
//! - [`realtime`] — the fan-out hub, client socket pumps, and the optional
//!   cross-instance pub/sub bridge
//! - [`timeline`] / [`reactions`] — the feed and reaction engines, cache
//!   assisted with database fallback
//! - [`store`] — the relational query layer
//!
//! The shared cache (redis) is the only cross-process surface: sessions,
//! revocation epochs, rate counters, deny lists, step-up replay markers, the
//! timeline index, and the realtime channel all live there. Running without
//! it degrades every one of those to process-local behavior, which is fine
//! for a single instance and wrong for more than one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ciel_server::{config::Config, handlers, observability, server::Server, state::AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     observability::init_tracing(&config)?;
//!
//!     let state = AppState::build(config.clone()).await?;
//!     let app = handlers::router(state);
//!
//!     Server::new(config).serve(app).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod reactions;
pub mod realtime;
mod retry;
pub mod server;
pub mod state;
pub mod store;
pub mod timeline;

pub use error::{Error, Result};
