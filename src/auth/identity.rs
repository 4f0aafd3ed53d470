//! Remote identity normalization.
//!
//! Authenticating proxies hand over identities in one of three shapes:
//!
//! | Shape          | Produced by                              |
//! |----------------|------------------------------------------|
//! | `user`         | most setups with realm stripping enabled |
//! | `user@REALM`   | `mod_auth_kerb`, nginx SPNEGO            |
//! | `DOMAIN\user`  | NTLM, IIS, `mod_auth_sspi`               |
//!
//! Neither function here fails. A value that does not have the expected
//! shape is passed through unchanged and left to the identity resolver.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static USER_AT_REALM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_\-.]+)@([A-Za-z0-9_\-.]+)$").expect("realm pattern is valid")
});

/// The identity exactly as the proxy supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIdentity {
    pub value: String,
}

impl RawIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Canonical username and optional realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedIdentity {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
}

impl NormalizedIdentity {
    /// Normalize `raw`. Realm splitting always runs before domain stripping.
    pub fn from_raw(raw: &RawIdentity, split_realm: bool, strip_domain: bool) -> Self {
        let (username, realm) = if split_realm {
            split_user_realm(&raw.value)
        } else {
            (raw.value.clone(), None)
        };

        let username = if strip_domain {
            strip_domain_name(&username)
        } else {
            username
        };

        Self { username, realm }
    }
}

/// Split `localpart@realm` into its parts.
///
/// Both sides may only contain ASCII letters, digits, `_`, `-` and `.`.
/// Anything else is returned unchanged without a realm.
pub fn split_user_realm(raw: &str) -> (String, Option<String>) {
    match USER_AT_REALM.captures(raw) {
        Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
        None => (raw.to_string(), None),
    }
}

/// Remove the domain from `user@domain` or `DOMAIN\user`.
///
/// Only applies when the value contains exactly one separator. With `@` the
/// first part is the user; with `\` the second part is.
pub fn strip_domain_name(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(['@', '\\']).collect();
    match parts.as_slice() {
        [user, _domain] if raw.contains('@') => (*user).to_string(),
        [_domain, user] => (*user).to_string(),
        _ => raw.to_string(),
    }
}
