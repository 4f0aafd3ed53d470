//! Health check endpoints for load balancers and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Always "healthy"; the gate has no external dependency to lose.
    pub status: &'static str,
    pub version: &'static str,
    pub sso: SsoStatus,
    pub sessions: SessionStatus,
}

/// The SSO settings in effect.
#[derive(Debug, Serialize)]
pub struct SsoStatus {
    pub seamless_login: bool,
    pub sso_variable: String,
    /// Number of non-blank excluded-path patterns compiled into the matcher.
    pub excluded_path_patterns: usize,
    pub excluded_hosts: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    /// Sessions held in memory, including expired ones not yet swept.
    pub stored: usize,
}

/// Full health check with the active SSO configuration.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.authenticator.snapshot();

    let health = HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        sso: SsoStatus {
            seamless_login: state.config.sso.seamless_login,
            sso_variable: snapshot.config.sso_variable.clone(),
            excluded_path_patterns: snapshot.matcher.pattern_count(),
            excluded_hosts: snapshot.config.excluded_hosts.len(),
        },
        sessions: SessionStatus {
            stored: state.sessions.len().await,
        },
    };

    (StatusCode::OK, Json(health))
}

/// Liveness check.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => {
                let metrics: String = handle.render();
                (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    metrics,
                )
            }
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
