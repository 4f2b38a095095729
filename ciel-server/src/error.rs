//! Error types and HTTP response conversion

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service
///
/// Every variant maps to exactly one user-visible kind. Anything that does
/// not fit the taxonomy collapses into `Internal` before it leaves the
/// process boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or invalid request input (400)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failure (401)
    ///
    /// Deliberately carries no detail: the response body must not reveal
    /// which check failed. Diagnostic detail belongs in the audit log.
    #[error("unauthorized")]
    Unauthorized,

    /// A valid step-up token is required for this operation (401, distinct code)
    #[error("step-up authentication required")]
    StepupRequired,

    /// Authorization failure (403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource conflict (409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Duplicate reaction (409, distinct code so clients can reconcile
    /// optimistic UI state)
    #[error("already reacted")]
    AlreadyReacted,

    /// Rate limit exceeded (429)
    #[error("rate limit exceeded")]
    RateLimited {
        /// Configured limit for the matched window
        limit: u32,
        /// Seconds until the current window ends
        retry_after_secs: u64,
    },

    /// A dependency the request cannot proceed without is unreachable (503)
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Unauthorized => "unauthorized",
            Error::StepupRequired => "stepup_required",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::AlreadyReacted => "already_reacted",
            Error::RateLimited { .. } => "rate_limited",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status for the error kind
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized | Error::StepupRequired => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::AlreadyReacted => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message. Internal detail never crosses this boundary.
    fn public_message(&self) -> String {
        match self {
            Error::InvalidRequest(msg) => msg.clone(),
            Error::Unauthorized => "unauthorized".to_string(),
            Error::StepupRequired => "step-up authentication required".to_string(),
            Error::Forbidden(msg) => msg.clone(),
            Error::NotFound(msg) => msg.clone(),
            Error::Conflict(msg) => msg.clone(),
            Error::AlreadyReacted => "already reacted".to_string(),
            Error::RateLimited { .. } => "too many requests".to_string(),
            Error::ServiceUnavailable(_) => "service temporarily unavailable".to_string(),
            Error::Internal(_) => "internal server error".to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::ServiceUnavailable(detail) => {
                tracing::error!(detail = %detail, "dependency unavailable");
            }
            Error::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
            }
            _ => {}
        }

        let status = self.status();
        let body = ErrorResponse::new(status, self.code(), self.public_message());

        if let Error::RateLimited {
            limit,
            retry_after_secs,
        } = &self
        {
            let mut response = (status, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after_secs.to_string())
                    .unwrap_or(HeaderValue::from_static("1")),
            );
            headers.insert(
                "X-RateLimit-Limit",
                HeaderValue::from_str(&limit.to_string())
                    .unwrap_or(HeaderValue::from_static("0")),
            );
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            return response;
        }

        (status, Json(body)).into_response()
    }
}

/// Classify a store failure: transient connection problems surface as 503,
/// everything else as 500.
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => {
                Error::ServiceUnavailable(format!("store connection: {}", err))
            }
            _ => Error::Internal(format!("store: {}", err)),
        }
    }
}

/// Cache errors in the authoritative data path are 503. Guards never use
/// this conversion; they fail open instead.
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::ServiceUnavailable(format!("cache: {}", err))
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::ServiceUnavailable(format!("cache pool: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            Error::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::StepupRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::AlreadyReacted.status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::RateLimited {
                limit: 10,
                retry_after_secs: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unauthorized_is_opaque() {
        // The 401 body must not leak which check failed.
        assert_eq!(Error::Unauthorized.public_message(), "unauthorized");
        assert_eq!(Error::Unauthorized.code(), "unauthorized");
    }

    #[test]
    fn stepup_required_has_distinct_code() {
        assert_eq!(Error::StepupRequired.code(), "stepup_required");
        assert_ne!(Error::StepupRequired.code(), Error::Unauthorized.code());
    }

    #[test]
    fn duplicate_reaction_is_distinct_conflict() {
        assert_eq!(Error::AlreadyReacted.code(), "already_reacted");
        assert_eq!(Error::Conflict("username taken".into()).code(), "conflict");
    }

    #[test]
    fn internal_detail_never_reaches_the_body() {
        let err = Error::Internal("secret query text".into());
        assert_eq!(err.public_message(), "internal server error");
    }
}
