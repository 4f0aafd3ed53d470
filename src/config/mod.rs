//! Configuration module for the SSO gate.
//!
//! The gate is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [server.trusted_proxies]
//! cidrs = ["10.0.0.0/8"]
//!
//! [sso]
//! seamless_login = true
//! sso_variable = "REMOTE_USER"
//! split_user_realm = true
//! excluded_paths = """
//! /cron.php
//! /blog/*
//! """
//! ```

mod directory;
mod observability;
mod server;
mod sso;

use std::path::Path;

pub use directory::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use sso::*;

use crate::auth::CompiledMatcher;

/// Root configuration for the SSO gate.
///
/// All sections are optional with sensible defaults, allowing minimal
/// configuration for simple deployments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoGateConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Single sign-on settings.
    #[serde(default)]
    pub sso: SsoSettings,

    /// Directory used to resolve remote usernames into local principals.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl SsoGateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SsoGateConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    ///
    /// These are save-time checks. Nothing validated here is re-checked
    /// while serving requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.sso.validate()?;
        self.directory.validate()?;

        // SSO never sees the end user's password, so a directory server that
        // binds with the user's own credentials can never be queried.
        if let Some(server) = self.directory.credential_bound_server() {
            return Err(ConfigError::Validation(format!(
                "Single sign-on is not valid with the directory server '{}' because that \
                 server binds with {}. The user's credentials are never available when \
                 single sign-on is enabled, so there is no way to bind to that server.",
                server.id,
                server.bind_method.describe()
            )));
        }

        // Compile once here so a bad pattern list is reported at load time
        // rather than on the first request.
        CompiledMatcher::compile(self.sso.excluded_paths.as_slice(), &self.sso.frontpage_path)
            .map_err(|e| ConfigError::Validation(format!("Invalid sso.excluded_paths: {e}")))?;

        if !self.server.trusted_proxies.is_configured() {
            tracing::warn!(
                sso_variable = %self.sso.sso_variable,
                "SSO is enabled without server.trusted_proxies configured. The identity \
                 header will be accepted from ANY source. This is safe only if the gate is \
                 exclusively reachable through the authenticating proxy."
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static ENV_VAR: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
    });
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
