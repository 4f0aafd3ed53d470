//! Services the SSO engine calls out to.
//!
//! The engine owns no state of its own. Everything it needs from the outside
//! world comes through these traits, injected into
//! [`SsoAuthenticator`](super::SsoAuthenticator) at construction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{CompiledMatcher, PatternError, Principal, PrincipalId, ResolveError, SessionResult};

/// Effective SSO settings consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoConfig {
    /// Name of the server variable carrying the remote identity.
    pub sso_variable: String,
    pub split_user_realm: bool,
    pub strip_domain_name: bool,
    /// Exclusion patterns, one per line.
    pub excluded_paths: Vec<String>,
    /// Hosts on which SSO never runs.
    pub excluded_hosts: Vec<String>,
    /// Substituted for `<front>` in `excluded_paths`.
    pub frontpage_path: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            sso_variable: "REMOTE_USER".to_string(),
            split_user_realm: false,
            strip_domain_name: false,
            excluded_paths: Vec::new(),
            excluded_hosts: Vec::new(),
            frontpage_path: "/node".to_string(),
        }
    }
}

/// A configuration together with its compiled path matcher.
#[derive(Debug, Clone)]
pub struct SsoSnapshot {
    pub config: SsoConfig,
    pub matcher: CompiledMatcher,
}

impl SsoSnapshot {
    pub fn compile(config: SsoConfig) -> Result<Self, PatternError> {
        let matcher =
            CompiledMatcher::compile(config.excluded_paths.as_slice(), &config.frontpage_path)?;
        Ok(Self { config, matcher })
    }
}

/// Supplies the current configuration.
pub trait ConfigProvider: Send + Sync {
    /// The snapshot to use for one evaluation. Callers hold on to it for the
    /// whole request.
    fn get(&self) -> Arc<SsoSnapshot>;
}

/// Looks up the session behind a session token.
#[async_trait]
pub trait SessionInspector: Send + Sync {
    /// Whether `token` names a live session.
    async fn has_session(&self, token: &str) -> bool;

    /// The user owning the session, if it belongs to one.
    async fn session_user_id(&self, token: &str) -> Option<PrincipalId>;
}

/// Validates a normalized username against the directory.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Called at most once per authentication attempt and never retried.
    async fn resolve(&self, username: &str) -> Result<PrincipalId, ResolveError>;
}

/// A session created for a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Logs a principal in.
#[async_trait]
pub trait SessionEstablisher: Send + Sync {
    /// Create a session for `principal`. Called exactly once per successful
    /// authentication.
    async fn finalize(&self, principal: &Principal) -> SessionResult<EstablishedSession>;

    /// End the session behind `token`. Unknown tokens are not an error.
    async fn terminate(&self, token: &str) -> SessionResult<()>;
}

/// Receives structured diagnostic events.
///
/// Recording must not fail or block; the authentication outcome never
/// depends on it.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: &str, fields: &[(&str, &str)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Config provider whose snapshot can be replaced at runtime.
///
/// `publish` compiles the new matcher before taking the lock, so readers
/// only ever see fully built snapshots. Requests that already captured a
/// snapshot keep using it.
#[derive(Debug)]
pub struct SwappableConfig {
    current: RwLock<Arc<SsoSnapshot>>,
}

impl SwappableConfig {
    pub fn new(config: SsoConfig) -> Result<Self, PatternError> {
        Ok(Self {
            current: RwLock::new(Arc::new(SsoSnapshot::compile(config)?)),
        })
    }

    /// Replace the active configuration. On error the previous one stays.
    pub fn publish(&self, config: SsoConfig) -> Result<(), PatternError> {
        let snapshot = Arc::new(SsoSnapshot::compile(config)?);
        *self.current.write() = snapshot;
        tracing::info!("Published new SSO configuration");
        Ok(())
    }
}

impl ConfigProvider for SwappableConfig {
    fn get(&self) -> Arc<SsoSnapshot> {
        self.current.read().clone()
    }
}

/// Emits diagnostic events as `tracing` events under the
/// `sso_gate::diagnostics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, event: &str, fields: &[(&str, &str)]) {
        let fields: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
            .collect();
        let fields = serde_json::Value::Object(fields);

        match event {
            "sso.collaborator_failure" => {
                tracing::warn!(target: "sso_gate::diagnostics", event, %fields, "SSO diagnostic")
            }
            "sso.authenticated" | "sso.rejected" => {
                tracing::info!(target: "sso_gate::diagnostics", event, %fields, "SSO diagnostic")
            }
            _ => tracing::debug!(target: "sso_gate::diagnostics", event, %fields, "SSO diagnostic"),
        }
    }
}
