//! Fixed-window rate limiting
//!
//! Counters live in the cache under
//! `rl:{route}:{subjectKind}:{subjectValue}:{windowSeconds}:{windowStart}`
//! where the window start is the wall clock floored to the window size. The
//! operation is INCR followed by EXPIRE when the counter is fresh; exceeding
//! the limit yields 429 with `Retry-After` and `X-RateLimit-*` headers.
//!
//! When the cache is unreachable the limiter passes the request through with
//! a warning. Availability wins over enforcement here.

use std::ops::DerefMut;

use deadpool_redis::Pool as RedisPool;
use uuid::Uuid;

use crate::cache;
use crate::error::{Error, Result};

/// Who a limit counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// Client IP address
    Ip,
    /// Authenticated user id; unauthenticated requests count against the IP
    User,
    /// User when authenticated, IP otherwise
    UserOrIp,
}

/// One limit entry for a route class
#[derive(Debug, Clone, Copy)]
pub struct RouteLimit {
    pub limit: u32,
    pub window_secs: u64,
    pub subject: SubjectKind,
}

const fn limit(limit: u32, window_secs: u64, subject: SubjectKind) -> RouteLimit {
    RouteLimit {
        limit,
        window_secs,
        subject,
    }
}

/// Limits for a route class. Routes with several entries are checked against
/// every one of them.
pub fn limits_for(route: &str) -> &'static [RouteLimit] {
    use SubjectKind::{Ip, User, UserOrIp};

    match route {
        "auth_login_start" => const { &[limit(10, 60, Ip)] },
        "auth_login_finish" => const { &[limit(10, 60, Ip)] },
        "auth_signup" => const { &[limit(5, 600, Ip)] },
        "auth_reauth_start" => const { &[limit(10, 60, Ip)] },
        "auth_reauth_finish" => const { &[limit(10, 60, Ip)] },
        "auth_password_change" => const { &[limit(5, 600, User)] },
        "auth_logout_all" => const { &[limit(5, 600, User)] },
        "auth_me" => const { &[limit(120, 60, UserOrIp)] },
        "timeline_get" => const { &[limit(120, 60, Ip)] },
        "posts_create" => const { &[limit(30, 60, User)] },
        "posts_delete" => const { &[limit(30, 60, User)] },
        "posts_react" => const { &[limit(60, 60, User)] },
        "reactions_get" => const { &[limit(240, 60, Ip)] },
        "reactions_users_get" => const { &[limit(120, 60, Ip)] },
        "media_upload" => const { &[limit(50, 86_400, UserOrIp), limit(10, 600, UserOrIp)] },
        "media_get" => const { &[limit(600, 60, Ip)] },
        "ws_timeline" => const { &[limit(30, 60, Ip)] },
        _ => const { &[limit(300, 60, Ip)] },
    }
}

/// Start of the fixed window containing `now`
pub fn window_start(now: i64, window_secs: u64) -> i64 {
    let window = window_secs as i64;
    (now / window) * window
}

/// Cache key for one counter
pub fn counter_key(
    route: &str,
    subject_kind: &str,
    subject_value: &str,
    window_secs: u64,
    start: i64,
) -> String {
    format!(
        "rl:{}:{}:{}:{}:{}",
        route, subject_kind, subject_value, window_secs, start
    )
}

/// Resolve a limit's subject for this request
///
/// Returns `(kind, value)` as they appear in the counter key. User-keyed
/// limits fall back to the IP when no user is present.
fn resolve_subject(
    subject: SubjectKind,
    ip: &str,
    user: Option<Uuid>,
) -> (&'static str, String) {
    match (subject, user) {
        (SubjectKind::Ip, _) => ("ip", ip.to_string()),
        (SubjectKind::User, Some(uid)) | (SubjectKind::UserOrIp, Some(uid)) => {
            ("user", uid.to_string())
        }
        (SubjectKind::User, None) | (SubjectKind::UserOrIp, None) => ("ip", ip.to_string()),
    }
}

/// Enforce every limit configured for the route
///
/// Errors with `RateLimited` (which renders the 429 headers) when any
/// counter exceeds its limit. Cache failure passes the request through.
pub async fn check(
    pool: &RedisPool,
    route: &str,
    ip: &str,
    user: Option<Uuid>,
    now: i64,
) -> Result<()> {
    for entry in limits_for(route) {
        let (kind, value) = resolve_subject(entry.subject, ip, user);
        let start = window_start(now, entry.window_secs);
        let key = counter_key(route, kind, &value, entry.window_secs, start);

        let count = cache::with_guard_timeout(async {
            let mut conn = pool.get().await?;
            let count: u64 = redis::cmd("INCR")
                .arg(&key)
                .query_async(conn.deref_mut())
                .await
                .map_err(Error::from)?;

            // Fresh counter: bound its lifetime to the window size.
            if count == 1 {
                redis::cmd("EXPIRE")
                    .arg(&key)
                    .arg(entry.window_secs)
                    .query_async::<()>(conn.deref_mut())
                    .await
                    .map_err(Error::from)?;
            }
            Ok(count)
        })
        .await;

        let Some(count) = count else {
            tracing::warn!(route = route, "rate limiter cache unavailable, passing through");
            continue;
        };

        if count > entry.limit as u64 {
            let window_end = start + entry.window_secs as i64;
            let retry_after = (window_end - now).max(1) as u64;
            tracing::warn!(
                route = route,
                subject_kind = kind,
                subject = %value,
                count = count,
                limit = entry.limit,
                "rate limit exceeded"
            );
            return Err(Error::RateLimited {
                limit: entry.limit,
                retry_after_secs: retry_after,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandated_table_entries_are_present() {
        let login = limits_for("auth_login_start");
        assert_eq!(login.len(), 1);
        assert_eq!(login[0].limit, 10);
        assert_eq!(login[0].window_secs, 60);
        assert_eq!(login[0].subject, SubjectKind::Ip);

        let signup = limits_for("auth_signup");
        assert_eq!((signup[0].limit, signup[0].window_secs), (5, 600));

        let posts = limits_for("posts_create");
        assert_eq!((posts[0].limit, posts[0].window_secs), (30, 60));
        assert_eq!(posts[0].subject, SubjectKind::User);

        let timeline = limits_for("timeline_get");
        assert_eq!((timeline[0].limit, timeline[0].window_secs), (120, 60));

        let media_get = limits_for("media_get");
        assert_eq!((media_get[0].limit, media_get[0].window_secs), (600, 60));
    }

    #[test]
    fn media_upload_has_both_windows() {
        let limits = limits_for("media_upload");
        assert_eq!(limits.len(), 2);
        assert_eq!((limits[0].limit, limits[0].window_secs), (50, 86_400));
        assert_eq!((limits[1].limit, limits[1].window_secs), (10, 600));
        assert!(limits.iter().all(|l| l.subject == SubjectKind::UserOrIp));
    }

    #[test]
    fn window_start_floors_to_the_window() {
        // now = 1_700_000_000 is 20s into its 60s window
        assert_eq!(window_start(1_700_000_000, 60), 1_699_999_980);
        assert_eq!(window_start(1_699_999_980, 60), 1_699_999_980);
        assert_eq!(window_start(1_700_000_039, 60), 1_699_999_980);
        assert_eq!(window_start(1_700_000_040, 60), 1_700_000_040);
    }

    #[test]
    fn counter_key_layout() {
        let key = counter_key("auth_login_start", "ip", "1.2.3.4", 60, 1_699_999_980);
        assert_eq!(key, "rl:auth_login_start:ip:1.2.3.4:60:1699999980");
    }

    #[test]
    fn subject_resolution_falls_back_to_ip() {
        let uid = Uuid::new_v4();

        let (kind, value) = resolve_subject(SubjectKind::UserOrIp, "1.2.3.4", Some(uid));
        assert_eq!(kind, "user");
        assert_eq!(value, uid.to_string());

        let (kind, value) = resolve_subject(SubjectKind::UserOrIp, "1.2.3.4", None);
        assert_eq!(kind, "ip");
        assert_eq!(value, "1.2.3.4");

        let (kind, _) = resolve_subject(SubjectKind::User, "1.2.3.4", None);
        assert_eq!(kind, "ip");
    }
}
