//! Request classification
//!
//! Every incoming request maps deterministically to a stable route-class
//! token via a pattern match on method and path. The token keys the deny
//! list and the rate-limit tables, so it must never depend on request
//! content beyond the route shape. Health probes classify as excluded and
//! bypass both guards.

use axum::http::Method;
use regex::Regex;
use std::sync::LazyLock;

/// Regex matching an entire UUID path segment
static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("UUID regex is valid")
});

/// Classification result for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Health probes; bypasses deny and rate-limit guards entirely
    Excluded,
    /// A classified route token
    Class(&'static str),
}

impl RouteClass {
    pub fn is_excluded(&self) -> bool {
        matches!(self, RouteClass::Excluded)
    }

    /// The stable token, or "excluded" for probes
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Excluded => "excluded",
            RouteClass::Class(token) => token,
        }
    }
}

fn is_uuid(segment: &str) -> bool {
    UUID_SEGMENT.is_match(segment)
}

/// Map a request to its route class
pub fn classify(method: &Method, path: &str) -> RouteClass {
    use RouteClass::{Class, Excluded};

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (method.as_str(), segments.as_slice()) {
        (_, ["healthz"]) | (_, ["readyz"]) | (_, ["livez"]) => Excluded,

        ("POST", ["auth", "signup"]) => Class("auth_signup"),
        ("POST", ["auth", "login", "start"]) => Class("auth_login_start"),
        ("POST", ["auth", "login", "finish"]) => Class("auth_login_finish"),
        ("POST", ["auth", "reauth", "start"]) => Class("auth_reauth_start"),
        ("POST", ["auth", "reauth", "finish"]) => Class("auth_reauth_finish"),
        ("POST", ["auth", "password", "change"]) => Class("auth_password_change"),
        ("POST", ["auth", "logout-all"]) => Class("auth_logout_all"),
        ("GET", ["auth", "me"]) => Class("auth_me"),

        ("GET", ["timeline"]) => Class("timeline_get"),

        ("POST", ["posts"]) => Class("posts_create"),
        ("DELETE", ["posts", id]) if is_uuid(id) => Class("posts_delete"),
        ("POST", ["posts", id, "react"]) if is_uuid(id) => Class("posts_react"),
        ("DELETE", ["posts", id, "react", _emoji]) if is_uuid(id) => Class("posts_react"),
        ("GET", ["posts", id, "reactions"]) if is_uuid(id) => Class("reactions_get"),
        ("GET", ["posts", id, "reactions", _emoji, "users"]) if is_uuid(id) => {
            Class("reactions_users_get")
        }

        ("POST", ["media"]) => Class("media_upload"),
        ("GET", ["media", _id]) => Class("media_get"),

        ("GET", ["ws", "timeline"]) => Class("ws_timeline"),

        _ => Class("default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST_ID: &str = "7b0448e4-08f8-4f6f-9a3b-6a1d0a6b8a11";

    #[test]
    fn health_probes_are_excluded() {
        assert!(classify(&Method::GET, "/healthz").is_excluded());
        assert!(classify(&Method::GET, "/readyz").is_excluded());
        assert!(!classify(&Method::GET, "/timeline").is_excluded());
    }

    #[test]
    fn auth_routes_classify_to_mandated_tokens() {
        assert_eq!(
            classify(&Method::POST, "/auth/login/start").as_str(),
            "auth_login_start"
        );
        assert_eq!(
            classify(&Method::POST, "/auth/login/finish").as_str(),
            "auth_login_finish"
        );
        assert_eq!(classify(&Method::POST, "/auth/signup").as_str(), "auth_signup");
    }

    #[test]
    fn content_routes_classify() {
        assert_eq!(classify(&Method::GET, "/timeline").as_str(), "timeline_get");
        assert_eq!(classify(&Method::POST, "/posts").as_str(), "posts_create");
        assert_eq!(classify(&Method::POST, "/media").as_str(), "media_upload");
        assert_eq!(classify(&Method::GET, "/media/abc123").as_str(), "media_get");
        assert_eq!(classify(&Method::GET, "/ws/timeline").as_str(), "ws_timeline");
    }

    #[test]
    fn reaction_routes_require_a_uuid_post_id() {
        let react = format!("/posts/{}/react", POST_ID);
        assert_eq!(classify(&Method::POST, &react).as_str(), "posts_react");

        let unreact = format!("/posts/{}/react/🔥", POST_ID);
        assert_eq!(classify(&Method::DELETE, &unreact).as_str(), "posts_react");

        let list = format!("/posts/{}/reactions", POST_ID);
        assert_eq!(classify(&Method::GET, &list).as_str(), "reactions_get");

        let users = format!("/posts/{}/reactions/🔥/users", POST_ID);
        assert_eq!(classify(&Method::GET, &users).as_str(), "reactions_users_get");

        // A non-UUID id falls through to the default class
        assert_eq!(
            classify(&Method::POST, "/posts/not-a-uuid/react").as_str(),
            "default"
        );
    }

    #[test]
    fn classification_is_method_sensitive() {
        assert_eq!(classify(&Method::GET, "/auth/signup").as_str(), "default");
        assert_eq!(classify(&Method::GET, "/posts").as_str(), "default");
    }

    #[test]
    fn trailing_slashes_do_not_change_the_class() {
        assert_eq!(classify(&Method::GET, "/timeline/").as_str(), "timeline_get");
        assert_eq!(classify(&Method::GET, "timeline").as_str(), "timeline_get");
    }

    #[test]
    fn unknown_routes_use_the_default_class() {
        assert_eq!(classify(&Method::GET, "/").as_str(), "default");
        assert_eq!(classify(&Method::PUT, "/anything/else").as_str(), "default");
    }
}
