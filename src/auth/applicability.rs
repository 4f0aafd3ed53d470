//! Decides whether a request should be treated as an SSO assertion.

use super::{CompiledMatcher, RequestContext, SsoConfig};

/// Paths on which SSO never runs automatically.
///
/// The clean-URL check must stay reachable anonymously, the SSO login route
/// authenticates explicitly, and the regular login/logout routes must not
/// log the user straight back in.
pub const BUILT_IN_EXCLUDED_PATHS: [&str; 4] = [
    "/admin/config/search/clean-urls/check",
    "/user/login/sso",
    "/user/login",
    "/user/logout",
];

/// Why a request is excluded from SSO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    BuiltInPath(&'static str),
    ExcludedHost(String),
    ExcludedPath,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::BuiltInPath(_) => "built_in_path",
            ExclusionReason::ExcludedHost(_) => "excluded_host",
            ExclusionReason::ExcludedPath => "excluded_path",
        }
    }
}

/// Result of the applicability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Applicable,
    AlreadyAuthenticated,
    Excluded(ExclusionReason),
    NoIdentity,
}

impl Applicability {
    pub fn is_applicable(&self) -> bool {
        matches!(self, Applicability::Applicable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Applicability::Applicable => "applicable",
            Applicability::AlreadyAuthenticated => "already_authenticated",
            Applicability::Excluded(reason) => reason.as_str(),
            Applicability::NoIdentity => "no_identity",
        }
    }
}

/// Whether SSO should be attempted for `ctx`.
pub fn applies(ctx: &RequestContext, cfg: &SsoConfig, matcher: &CompiledMatcher) -> bool {
    evaluate(ctx, cfg, matcher).is_applicable()
}

/// Like [`applies`], but reports which check decided.
pub fn evaluate(ctx: &RequestContext, cfg: &SsoConfig, matcher: &CompiledMatcher) -> Applicability {
    if ctx.is_authenticated() {
        return Applicability::AlreadyAuthenticated;
    }

    if let Some(reason) = exclusion(ctx, cfg, matcher) {
        return Applicability::Excluded(reason);
    }

    if !has_identity(ctx, cfg) {
        return Applicability::NoIdentity;
    }

    Applicability::Applicable
}

/// The configured SSO variable is present and non-empty.
pub fn has_identity(ctx: &RequestContext, cfg: &SsoConfig) -> bool {
    ctx.server_variable(&cfg.sso_variable)
        .is_some_and(|value| !value.is_empty())
}

/// Checks, in order: built-in paths, excluded hosts, excluded path patterns.
pub fn exclusion(
    ctx: &RequestContext,
    cfg: &SsoConfig,
    matcher: &CompiledMatcher,
) -> Option<ExclusionReason> {
    let path = ctx.effective_path();

    if let Some(builtin) = BUILT_IN_EXCLUDED_PATHS.iter().find(|p| **p == path) {
        return Some(ExclusionReason::BuiltInPath(*builtin));
    }

    let host = host_without_port(ctx.server_name());
    if let Some(excluded) = cfg
        .excluded_hosts
        .iter()
        .find(|h| h.eq_ignore_ascii_case(host))
    {
        return Some(ExclusionReason::ExcludedHost(excluded.clone()));
    }

    if matcher.matches(path) {
        return Some(ExclusionReason::ExcludedPath);
    }

    None
}

/// Strip a `:port` suffix, keeping bracketed IPv6 literals intact.
fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
