//! Deny-list checks
//!
//! Operator-maintained deny entries live only in the cache:
//!
//! ```text
//! deny:ip                   set of IPs
//! deny:user                 set of user ids
//! deny:ip:{ip}              TTL string (temporary ban)
//! deny:user:{uid}           TTL string (temporary ban)
//! deny:route:{route}:ban    TTL string (route-wide ban)
//! deny:route:{route}        set of subjects: "*", "ip:…", "user:…"
//! ```
//!
//! Checks run in a fixed order and short-circuit on the first hit. Every
//! cache call is bounded by the guard timeout; a cache failure means "not
//! denied" — the deny list fails open, never closed.

use std::ops::DerefMut;

use deadpool_redis::Pool as RedisPool;
use uuid::Uuid;

use crate::cache;
use crate::error::Error;

/// Evaluate the deny list for one request
///
/// Returns true when the request must be refused with 403.
pub async fn is_denied(pool: &RedisPool, route: &str, ip: &str, user: Option<Uuid>) -> bool {
    // 1. Route-wide temporary ban
    if key_present(pool, &format!("deny:route:{}:ban", route)).await {
        return true;
    }

    // 2. IP deny: permanent set membership, then temporary key
    if set_member(pool, "deny:ip", ip).await {
        return true;
    }
    if key_present(pool, &format!("deny:ip:{}", ip)).await {
        return true;
    }

    // 3. User deny, when the request is authenticated
    if let Some(uid) = user {
        let uid = uid.to_string();
        if set_member(pool, "deny:user", &uid).await {
            return true;
        }
        if key_present(pool, &format!("deny:user:{}", uid)).await {
            return true;
        }
    }

    // 4. Per-route subject set
    let route_key = format!("deny:route:{}", route);
    if set_member(pool, &route_key, "*").await {
        return true;
    }
    if set_member(pool, &route_key, &format!("ip:{}", ip)).await {
        return true;
    }
    if let Some(uid) = user {
        if set_member(pool, &route_key, &format!("user:{}", uid)).await {
            return true;
        }
    }

    false
}

/// GET the key; any present value denies. Errors fail open.
async fn key_present(pool: &RedisPool, key: &str) -> bool {
    cache::with_guard_timeout(async {
        let mut conn = pool.get().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(conn.deref_mut())
            .await
            .map_err(Error::from)?;
        Ok(value.is_some())
    })
    .await
    .unwrap_or(false)
}

/// SISMEMBER with fail-open error handling
async fn set_member(pool: &RedisPool, key: &str, member: &str) -> bool {
    cache::with_guard_timeout(async {
        let mut conn = pool.get().await?;
        let hit: bool = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(conn.deref_mut())
            .await
            .map_err(Error::from)?;
        Ok(hit)
    })
    .await
    .unwrap_or(false)
}
