//! Application state
//!
//! Built once at startup and cloned into every handler. All fields sit
//! behind one `Arc`, so a clone is a pointer bump.

use std::sync::Arc;

use deadpool_redis::Pool as RedisPool;

use crate::auth::{
    AuthEngine, MemorySessionStore, RedisSessionStore, SessionStore, TokenManager,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reactions::ReactionsEngine;
use crate::realtime::{self, HubHandle, HubRedis};
use crate::store::Store;
use crate::timeline::TimelineEngine;
use crate::{cache, database};

struct Inner {
    config: Config,
    store: Store,
    redis: Option<RedisPool>,
    tokens: TokenManager,
    auth: AuthEngine,
    timeline: TimelineEngine,
    reactions: ReactionsEngine,
    hub: HubHandle,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// Connect the pools, spawn the hub, and wire the engines together
    pub async fn build(config: Config) -> Result<Self> {
        let db_pool = database::create_pool(&config.database).await?;
        let store = Store::new(db_pool);

        let redis = match &config.redis {
            Some(redis_config) => Some(cache::create_pool(redis_config).await?),
            None => {
                tracing::warn!(
                    "no redis configured: sessions, rate limits, deny lists, and \
                     step-up replay protection are process-local"
                );
                None
            }
        };

        let tokens = TokenManager::new(&config.auth, redis.clone());

        let sessions: Arc<dyn SessionStore> = match &redis {
            Some(pool) => Arc::new(RedisSessionStore::new(
                pool.clone(),
                config
                    .auth
                    .login_session_ttl_secs
                    .max(config.auth.stepup_session_ttl_secs),
            )),
            None => Arc::new(MemorySessionStore::new()),
        };

        let hub_redis = match (&redis, &config.redis) {
            (Some(pool), Some(redis_config)) => {
                let client = redis::Client::open(redis_config.url.as_str())
                    .map_err(|e| Error::Internal(format!("redis client: {}", e)))?;
                Some(HubRedis {
                    pool: pool.clone(),
                    client,
                })
            }
            _ => None,
        };
        let hub = realtime::spawn(&config.realtime, hub_redis);

        let auth = AuthEngine::new(
            store.clone(),
            sessions,
            tokens.clone(),
            redis.clone(),
            config.auth.clone(),
        );
        let timeline = TimelineEngine::new(store.clone(), redis.clone());
        let reactions = ReactionsEngine::new(store.clone(), redis.clone(), hub.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                redis,
                tokens,
                auth,
                timeline,
                reactions,
                hub,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn redis(&self) -> Option<&RedisPool> {
        self.inner.redis.as_ref()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    pub fn auth(&self) -> &AuthEngine {
        &self.inner.auth
    }

    pub fn timeline(&self) -> &TimelineEngine {
        &self.inner.timeline
    }

    pub fn reactions(&self) -> &ReactionsEngine {
        &self.inner.reactions
    }

    pub fn hub(&self) -> &HubHandle {
        &self.inner.hub
    }
}
