//! Redis connection pool management and timeout policy
//!
//! All cache access in the guard path is bounded by [`GUARD_TIMEOUT`] and all
//! access in the authoritative data path by [`DATA_TIMEOUT`]. Callers decide
//! whether a timeout fails open (guards) or surfaces as 503 (data path).

use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use std::future::Future;
use std::time::Duration;

use crate::{
    config::RedisConfig,
    error::{Error, Result},
    retry,
};

/// Hard ceiling for cache calls made by the deny/rate-limit guards
pub const GUARD_TIMEOUT: Duration = Duration::from_millis(250);

/// Hard ceiling for cache calls in the data path (sessions, revocation,
/// timeline index, reaction cache)
pub const DATA_TIMEOUT: Duration = Duration::from_secs(1);

/// Open the redis pool, retrying while the server boots
pub(crate) async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = retry::connect_with_backoff(
        "redis",
        config.max_retries,
        Duration::from_secs(config.retry_delay_secs),
        || open_pool(config),
    )
    .await?;

    tracing::info!(max_connections = config.max_connections, "redis pool ready");
    Ok(pool)
}

/// One connection attempt: build the pool and prove a connection works
async fn open_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = DeadpoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| Error::Internal(format!("redis pool config: {}", e)))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Internal(format!("redis pool build: {}", e)))?;

    // The pool itself is lazy; grab one connection so a bad URL or a
    // down server fails here, inside the retry loop.
    pool.get()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("redis probe: {}", e)))?;

    Ok(pool)
}

/// Run a cache future under the data-path deadline, mapping timeout to 503
pub async fn with_data_timeout<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(DATA_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::ServiceUnavailable("cache call timed out".to_string())),
    }
}

/// Run a cache future under the guard deadline. Returns `None` on timeout or
/// error; guard callers treat `None` as "cache unavailable" and fail open.
pub async fn with_guard_timeout<T, F>(fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(GUARD_TIMEOUT, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "cache error in guard path, failing open");
            None
        }
        Err(_) => {
            tracing::warn!("cache timeout in guard path, failing open");
            None
        }
    }
}
