//! Relational store access
//!
//! The schema itself is owned by the deployment (see `schema.sql` at the
//! repository root for the reference shape); this module is the query layer
//! the core subsystems need: users and credentials, posts, reaction events
//! and counters, and invite codes.
//!
//! Reads are methods on [`Store`]. Writes that must participate in a caller's
//! transaction are free functions taking a `PgExecutor`, so the reactions
//! engine can compose them under one commit.

mod invites;
mod models;
mod posts;
mod reactions;
mod users;

pub use models::{Credential, Post, PostView, ReactionCount, ReactionUser, User, UserRef};
pub use reactions::{
    decrement_count, delete_reaction, increment_count, insert_reaction, prune_zero_counts,
};

use sqlx::PgPool;

/// Handle over the relational store
///
/// Cloning is cheap; the pool is internally reference-counted.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that open transactions
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
