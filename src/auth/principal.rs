//! Local principals produced by a successful SSO login.

use std::{fmt, num::NonZeroU64};

use serde::{Deserialize, Serialize};

/// Identifier of a local account. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(NonZeroU64);

impl PrincipalId {
    /// Returns `None` for 0, which is reserved for the anonymous user.
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A resolved local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    /// Normalized username the principal was resolved from.
    pub username: String,
    /// Kerberos realm, when realm splitting produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
}
