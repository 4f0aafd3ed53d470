use std::{net::IpAddr, time::Duration};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Proxies allowed to assert the SSO identity.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,

    /// Upper bound on a single identity-resolution call, in seconds.
    /// The call is not retried when it runs out.
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    /// Session cookie issued after a successful SSO login.
    #[serde(default)]
    pub session: SessionCookieConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trusted_proxies: TrustedProxiesConfig::default(),
            resolve_timeout_secs: default_resolve_timeout(),
            session: SessionCookieConfig::default(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server.resolve_timeout_secs must be greater than zero".into(),
            ));
        }
        for cidr in &self.trusted_proxies.cidrs {
            if cidr.parse::<IpNet>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "server.trusted_proxies.cidrs contains an invalid CIDR '{cidr}'"
                )));
            }
        }
        self.session.validate()
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_resolve_timeout() -> u64 {
    10
}

/// Configuration for the reverse proxies that authenticate users.
///
/// **Security Note:** the SSO variable is a bare request header. Anyone who can
/// reach the gate directly can set it, so it is only honoured when the
/// connecting peer is a known proxy.
///
/// - `dangerously_trust_all: true` - **DANGEROUS**: accepts the identity header
///   from ANY source. Only use when the gate is unreachable except through
///   the authenticating proxy.
///
/// - `cidrs: ["10.0.0.0/8"]` - accept the identity header only when the
///   connecting IP is within one of the ranges. This is the recommended setup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Trust every peer.
    ///
    /// **WARNING: This is a security risk!** Any client that connects directly
    /// can log in as anyone by sending the SSO header.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    /// Trusted proxy CIDR ranges (e.g., ["10.0.0.0/8", "172.16.0.0/12"]).
    #[serde(default)]
    pub cidrs: Vec<String>,
}

impl TrustedProxiesConfig {
    /// Parse the CIDR strings into IpNet objects.
    ///
    /// Invalid CIDRs are logged as warnings and skipped.
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter_map(|cidr_str| {
                cidr_str.parse::<IpNet>().ok().or_else(|| {
                    tracing::warn!(cidr = %cidr_str, "Invalid CIDR in trusted_proxies config, skipping");
                    None
                })
            })
            .collect()
    }

    /// Check if an IP address is within any of the trusted CIDR ranges.
    pub fn is_trusted_ip(&self, ip: IpAddr, parsed_cidrs: &[IpNet]) -> bool {
        if self.dangerously_trust_all {
            return true;
        }
        parsed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// Returns true when some proxy could be trusted.
    ///
    /// When this is false the identity header is accepted from anyone, which
    /// the loader warns about.
    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionCookieConfig {
    /// Cookie name.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Session duration in seconds.
    #[serde(default = "default_session_duration")]
    pub duration_secs: u64,

    /// Secure cookie (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            duration_secs: default_session_duration(),
            secure: true,
        }
    }
}

impl SessionCookieConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "Session cookie name cannot be empty".into(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "Session duration cannot be zero".into(),
            ));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

fn default_session_cookie() -> String {
    "__sso_session".to_string()
}

fn default_session_duration() -> u64 {
    8 * 3600 // one working day
}

fn default_true() -> bool {
    true
}
