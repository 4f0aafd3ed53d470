//! Observability module providing logging and metrics.
//!
//! This module initializes and configures:
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters for SSO outcomes and cache decisions

pub mod metrics;
#[cfg(feature = "server")]
mod tracing_init;

#[cfg(feature = "server")]
pub use tracing_init::*;
