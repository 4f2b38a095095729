//! Challenge-session storage
//!
//! In-flight login and step-up exchanges park their per-attempt state here.
//! Two implementations share one contract: an in-process map for single-node
//! deployments and a shared-cache store so any backend instance can finish an
//! exchange another instance started.
//!
//! Sessions are one-shot: the finish side of the protocol deletes the record
//! before issuing any token.

use std::collections::HashMap;
use std::ops::DerefMut;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool as RedisPool;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache;
use crate::error::{Error, Result};

/// Which exchange a session belongs to; determines key prefix and TTL policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Login,
    Stepup,
}

impl SessionKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            SessionKind::Login => "login:session:",
            SessionKind::Stepup => "stepup:session:",
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix(), id)
    }
}

/// Ephemeral state for one challenge-response attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSession {
    /// Random session id (base64url)
    pub id: String,
    /// Username the exchange is for
    pub username: String,
    /// Bound user id; present only on step-up sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Nonce supplied by the client on start
    pub client_nonce: String,
    /// Combined nonce the server answered with (client nonce + random part)
    pub server_nonce: String,
    /// Credential salt, base64
    pub salt_b64: String,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl ChallengeSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage contract for challenge sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a session under its id
    async fn put(&self, kind: SessionKind, session: &ChallengeSession) -> Result<()>;

    /// Fetch a session; expired records behave as absent
    async fn get(&self, kind: SessionKind, id: &str) -> Result<Option<ChallengeSession>>;

    /// Remove a session. Removing an absent session is not an error.
    async fn delete(&self, kind: SessionKind, id: &str) -> Result<()>;
}

// ============================================================================
// In-process store
// ============================================================================

/// Mutex-guarded map for single-instance deployments
///
/// Expired entries are swept opportunistically on every `put` and `get`, so
/// the map never grows past the live session set plus the sweep interval.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, ChallengeSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(map: &mut HashMap<String, ChallengeSession>, now: DateTime<Utc>) {
        map.retain(|_, s| !s.is_expired(now));
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, kind: SessionKind, session: &ChallengeSession) -> Result<()> {
        let mut map = self
            .sessions
            .lock()
            .map_err(|_| Error::Internal("session store poisoned".to_string()))?;
        Self::sweep(&mut map, Utc::now());
        map.insert(kind.key(&session.id), session.clone());
        Ok(())
    }

    async fn get(&self, kind: SessionKind, id: &str) -> Result<Option<ChallengeSession>> {
        let mut map = self
            .sessions
            .lock()
            .map_err(|_| Error::Internal("session store poisoned".to_string()))?;
        let now = Utc::now();
        Self::sweep(&mut map, now);
        Ok(map.get(&kind.key(id)).cloned())
    }

    async fn delete(&self, kind: SessionKind, id: &str) -> Result<()> {
        let mut map = self
            .sessions
            .lock()
            .map_err(|_| Error::Internal("session store poisoned".to_string()))?;
        map.remove(&kind.key(id));
        Ok(())
    }
}

// ============================================================================
// Shared-cache store
// ============================================================================

/// Cache-backed store so any instance can serve the finish round
pub struct RedisSessionStore {
    pool: RedisPool,
    /// Upper bound on any record's cache TTL, independent of its own expiry
    max_ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(pool: RedisPool, max_ttl_secs: u64) -> Self {
        Self { pool, max_ttl_secs }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, kind: SessionKind, session: &ChallengeSession) -> Result<()> {
        let remaining = (session.expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            return Ok(());
        }
        let ttl = (remaining as u64).min(self.max_ttl_secs).max(1);

        let key = kind.key(&session.id);
        let value = serde_json::to_string(session)
            .map_err(|e| Error::Internal(format!("session serialize: {}", e)))?;

        cache::with_data_timeout(async {
            let mut conn = self.pool.get().await?;
            redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("EX")
                .arg(ttl)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, kind: SessionKind, id: &str) -> Result<Option<ChallengeSession>> {
        let key = kind.key(id);
        let raw: Option<String> = cache::with_data_timeout(async {
            let mut conn = self.pool.get().await?;
            redis::cmd("GET")
                .arg(&key)
                .query_async(conn.deref_mut())
                .await
                .map_err(Error::from)
        })
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let session: ChallengeSession = serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("session deserialize: {}", e)))?;

        // Re-verify the absolute expiry: the cache's TTL clock may disagree
        // with ours.
        if session.is_expired(Utc::now()) {
            self.delete(kind, id).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    async fn delete(&self, kind: SessionKind, id: &str) -> Result<()> {
        let key = kind.key(id);
        cache::with_data_timeout(async {
            let mut conn = self.pool.get().await?;
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await
    }
}
