use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Directory configuration.
///
/// The gate never binds to a directory itself. `servers` records how the
/// directory servers behind the resolver are bound so that configurations
/// which cannot work with SSO are refused, and `users` backs the built-in
/// static resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Directory servers used by the identity resolver.
    #[serde(default)]
    pub servers: Vec<DirectoryServerConfig>,

    /// Known usernames and their local principal IDs.
    #[serde(default)]
    pub users: BTreeMap<String, u64>,

    /// Match usernames case-sensitively. Directory lookups are usually
    /// case-insensitive, so this defaults to false.
    #[serde(default)]
    pub case_sensitive: bool,

    /// Create a principal for usernames that are not in `users`.
    #[serde(default)]
    pub provision_unknown_users: bool,
}

impl DirectoryConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "directory.servers entries need a non-empty id".into(),
                ));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate directory server id '{}'",
                    server.id
                )));
            }
        }

        if let Some((name, _)) = self.users.iter().find(|(_, id)| **id == 0) {
            return Err(ConfigError::Validation(format!(
                "directory user '{name}' has principal id 0; principal ids must be positive"
            )));
        }

        Ok(())
    }

    /// First enabled server whose bind mode needs the end user's password.
    pub fn credential_bound_server(&self) -> Option<&DirectoryServerConfig> {
        self.servers
            .iter()
            .find(|s| s.enabled && s.bind_method.requires_user_credentials())
    }
}

/// A directory server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryServerConfig {
    /// Server identifier.
    pub id: String,

    /// Whether the server is active.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How the server is bound.
    pub bind_method: BindMethod,
}

fn default_true() -> bool {
    true
}

/// Directory bind mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMethod {
    /// Bind with a dedicated service account.
    ServiceAccount,
    /// Bind with the user's own credentials.
    User,
    /// Anonymous search, then bind with the user's credentials.
    AnonUser,
    /// Anonymous bind.
    Anon,
}

impl BindMethod {
    pub fn requires_user_credentials(self) -> bool {
        matches!(self, BindMethod::User | BindMethod::AnonUser)
    }

    pub fn describe(self) -> &'static str {
        match self {
            BindMethod::ServiceAccount => "a service account",
            BindMethod::User => "the user's own credentials",
            BindMethod::AnonUser => "an anonymous search followed by the user's own credentials",
            BindMethod::Anon => "an anonymous bind",
        }
    }
}
