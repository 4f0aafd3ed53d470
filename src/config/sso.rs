use serde::{Deserialize, Deserializer, Serialize};

use super::ConfigError;
use crate::auth::SsoConfig;

/// Single sign-on settings.
///
/// The identity is read from a request variable placed there by an
/// authenticating reverse proxy (Apache `mod_auth_kerb`, `mod_auth_sspi`,
/// nginx SPNEGO, IIS). Only the name of that variable is configured here; the
/// proxy is trusted according to `server.trusted_proxies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoSettings {
    /// Authenticate automatically on every request that carries the SSO
    /// variable. When off, SSO only happens on the explicit `/user/login/sso`
    /// route.
    #[serde(default)]
    pub seamless_login: bool,

    /// Split `user@realm` identities into username and realm.
    /// This is what `mod_auth_kerb` produces by default.
    #[serde(default)]
    pub split_user_realm: bool,

    /// Strip a domain from `user@domain` or `DOMAIN\user` identities so the
    /// same account is used with and without a realm.
    #[serde(default)]
    pub strip_domain_name: bool,

    /// Name of the request variable containing the remote user.
    /// Usually `REMOTE_USER` or `REDIRECT_REMOTE_USER`.
    #[serde(default = "default_sso_variable")]
    pub sso_variable: String,

    /// Paths excluded from SSO, one per line. `*` is a wildcard and `<front>`
    /// stands for the front page.
    #[serde(default, deserialize_with = "deserialize_lines")]
    pub excluded_paths: Vec<String>,

    /// Hosts excluded from SSO, one per line.
    #[serde(default, deserialize_with = "deserialize_lines")]
    pub excluded_hosts: Vec<String>,

    /// The site's front page path, substituted for `<front>`.
    #[serde(default = "default_frontpage_path")]
    pub frontpage_path: String,

    /// Redirect users somewhere else after logout. Recommended for most
    /// sites, pointing at a path that is not behind SSO.
    #[serde(default)]
    pub redirect_on_logout: bool,

    /// Internal path users are sent to on logout.
    #[serde(default)]
    pub logout_redirect_path: String,

    /// Tell the user they were signed in after a successful SSO login.
    #[serde(default)]
    pub enable_login_confirmation_message: bool,
}

impl Default for SsoSettings {
    fn default() -> Self {
        Self {
            seamless_login: false,
            split_user_realm: false,
            strip_domain_name: false,
            sso_variable: default_sso_variable(),
            excluded_paths: Vec::new(),
            excluded_hosts: Vec::new(),
            frontpage_path: default_frontpage_path(),
            redirect_on_logout: false,
            logout_redirect_path: String::new(),
            enable_login_confirmation_message: false,
        }
    }
}

impl SsoSettings {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.sso_variable.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sso.sso_variable cannot be empty".into(),
            ));
        }

        if self.redirect_on_logout {
            if self.logout_redirect_path.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "sso.logout_redirect_path cannot be blank when sso.redirect_on_logout is set"
                        .into(),
                ));
            }
            if !is_internal_path(&self.logout_redirect_path) {
                return Err(ConfigError::Validation(format!(
                    "sso.logout_redirect_path '{}' is not a valid internal path; internal \
                     paths start with '/', '?' or '#'",
                    self.logout_redirect_path
                )));
            }
        }

        Ok(())
    }

    /// The immutable snapshot consumed by the authentication engine.
    pub fn to_sso_config(&self) -> SsoConfig {
        SsoConfig {
            sso_variable: self.sso_variable.clone(),
            split_user_realm: self.split_user_realm,
            strip_domain_name: self.strip_domain_name,
            excluded_paths: self.excluded_paths.clone(),
            excluded_hosts: self.excluded_hosts.clone(),
            frontpage_path: self.frontpage_path.clone(),
        }
    }

    /// Where to send a user after logout.
    pub fn logout_destination(&self) -> &str {
        if self.redirect_on_logout {
            &self.logout_redirect_path
        } else {
            "/"
        }
    }
}

fn default_sso_variable() -> String {
    "REMOTE_USER".to_string()
}

fn default_frontpage_path() -> String {
    "/node".to_string()
}

/// Internal paths start with `/`, `?` or `#`.
///
/// `//host` and `/\host` are refused: browsers treat both as
/// protocol-relative and leave the site. Control characters are refused
/// outright since browsers strip tabs and newlines before parsing.
pub fn is_internal_path(path: &str) -> bool {
    if path.chars().any(|c| c.is_ascii_control()) {
        return false;
    }

    match path.as_bytes() {
        [b'/', b'/' | b'\\', ..] => false,
        [b'/' | b'?' | b'#', ..] => true,
        _ => false,
    }
}

/// Multi-line text or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrLines {
    Text(String),
    Lines(Vec<String>),
}

/// Accept either a multi-line string or an array and store one entry per
/// non-blank line, trimmed.
fn deserialize_lines<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match TextOrLines::deserialize(deserializer)? {
        TextOrLines::Text(text) => vec![text],
        TextOrLines::Lines(lines) => lines,
    };
    Ok(lines_to_list(raw.iter().map(String::as_str)))
}

/// Split text on `\r\n`, `\r` or `\n`, trim each line and drop blank ones.
pub fn lines_to_list<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    texts
        .into_iter()
        .flat_map(|text| text.split(['\r', '\n']))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
