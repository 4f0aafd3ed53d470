//! Prometheus metrics for the SSO gate.
//!
//! Every recorder is a no-op unless the crate is built with the `prometheus`
//! feature and [`init_metrics`] ran with metrics enabled.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::debug!("Metrics enabled in config but the 'prometheus' feature is not compiled");
    }
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);

        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string(), "status_class" => status_class.clone())
            .increment(1);

        histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record the outcome of an SSO evaluation.
///
/// # Arguments
/// * `outcome` - "authenticated", "rejected", "collaborator_failure" or "not_applicable"
pub fn record_sso_outcome(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("sso_outcomes_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a shared-cache admission decision.
pub fn record_cache_decision(decision: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("sso_cache_decisions_total", "decision" => decision.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = decision;
    }
}

/// Record an SSO header that arrived from a peer outside the trusted proxies.
pub fn record_untrusted_sso_header() {
    #[cfg(feature = "prometheus")]
    {
        counter!("sso_untrusted_headers_total").increment(1);
    }
}

/// Record JIT (Just-in-Time) provisioning of a directory user.
pub fn record_jit_provision(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("jit_provisions_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record an error returned to a client.
///
/// # Arguments
/// * `error_type` - Broad class, e.g. "auth_failure"
/// * `error_code` - The machine-readable code in the response body
pub fn record_gateway_error(error_type: &str, error_code: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "gateway_errors_total",
            "error_type" => error_type.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (error_type, error_code);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
