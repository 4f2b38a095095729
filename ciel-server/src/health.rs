//! Health check handlers
//!
//! Both probes classify as excluded routes and bypass the deny and
//! rate-limit guards.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::DerefMut;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    pub version: String,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness probe: 200 whenever the process is up
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe: 200 when every configured dependency answers
///
/// The database is required; redis only participates when configured, since
/// the service runs (degraded) without it.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let mut ready = true;

    let database = match sqlx::query("SELECT 1")
        .execute(state.store().pool())
        .await
    {
        Ok(_) => DependencyStatus {
            healthy: true,
            message: None,
        },
        Err(e) => {
            ready = false;
            DependencyStatus {
                healthy: false,
                message: Some(e.to_string()),
            }
        }
    };
    dependencies.insert("database".to_string(), database);

    if let Some(pool) = state.redis() {
        let redis = match ping_redis(pool).await {
            Ok(()) => DependencyStatus {
                healthy: true,
                message: None,
            },
            Err(e) => {
                ready = false;
                DependencyStatus {
                    healthy: false,
                    message: Some(e),
                }
            }
        };
        dependencies.insert("redis".to_string(), redis);
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            service: state.config().service.name.clone(),
            dependencies,
        }),
    )
}

async fn ping_redis(pool: &deadpool_redis::Pool) -> Result<(), String> {
    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
    redis::cmd("PING")
        .query_async::<String>(conn.deref_mut())
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_serialize_with_dependency_detail() {
        let mut dependencies = HashMap::new();
        dependencies.insert(
            "database".to_string(),
            DependencyStatus {
                healthy: false,
                message: Some("connection refused".to_string()),
            },
        );
        let response = ReadinessResponse {
            ready: false,
            service: "ciel-server".to_string(),
            dependencies,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ready"], false);
        assert_eq!(json["dependencies"]["database"]["healthy"], false);
    }

    #[test]
    fn healthy_dependency_omits_message() {
        let status = DependencyStatus {
            healthy: true,
            message: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("message").is_none());
    }
}
