use serde::Serialize;

use crate::auth::{RequestContext, SsoConfig};

/// Whether a response may be served from, or stored in, a shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDecision {
    Allow,
    Deny,
}

impl CacheDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheDecision::Allow => "allow",
            CacheDecision::Deny => "deny",
        }
    }
}

/// Keeps shared caches from serving pages across identities.
///
/// A request with a session is personal. A request without a session that
/// still carries the SSO header is about to become someone, so a cached
/// anonymous page would be wrong for it too.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheAdmissionPolicy;

impl CacheAdmissionPolicy {
    pub fn check(has_session: bool, sso_header_present: bool) -> CacheDecision {
        if has_session || sso_header_present {
            CacheDecision::Deny
        } else {
            CacheDecision::Allow
        }
    }

    /// Apply the policy to a request context.
    ///
    /// The header counts as present even when empty.
    pub fn check_request(ctx: &RequestContext, cfg: &SsoConfig) -> CacheDecision {
        Self::check(
            ctx.has_session(),
            ctx.server_variable(&cfg.sso_variable).is_some(),
        )
    }
}
