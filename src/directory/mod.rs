//! Identity resolver backed by the `[directory]` configuration section.
//!
//! Stands in for a directory lookup in deployments where the set of accounts
//! is small and known up front, and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    auth::{IdentityResolver, PrincipalId, ResolveError},
    config::DirectoryConfig,
    observability::metrics,
};

/// Username to principal map with optional just-in-time provisioning.
#[derive(Debug)]
pub struct StaticDirectory {
    users: RwLock<HashMap<String, PrincipalId>>,
    case_sensitive: bool,
    provision_unknown_users: bool,
}

impl StaticDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let case_sensitive = config.case_sensitive;
        let users = config
            .users
            .iter()
            .filter_map(|(name, id)| {
                let key = lookup_key(name, case_sensitive);
                PrincipalId::new(*id).map(|id| (key, id))
            })
            .collect();

        Self {
            users: RwLock::new(users),
            case_sensitive,
            provision_unknown_users: config.provision_unknown_users,
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn provision(&self, key: String) -> Result<PrincipalId, ResolveError> {
        let mut users = self.users.write();
        // Another request may have provisioned the same name meanwhile.
        if let Some(id) = users.get(&key) {
            return Ok(*id);
        }

        let id = users
            .values()
            .map(|id| id.get())
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .and_then(PrincipalId::new)
            .ok_or_else(|| ResolveError::Unavailable("principal id space exhausted".into()))?;
        users.insert(key.clone(), id);

        tracing::info!(username = %key, principal_id = %id, "JIT provisioned SSO user");
        metrics::record_jit_provision("created");
        Ok(id)
    }
}

fn lookup_key(username: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        username.to_string()
    } else {
        username.to_lowercase()
    }
}

#[async_trait]
impl IdentityResolver for StaticDirectory {
    async fn resolve(&self, username: &str) -> Result<PrincipalId, ResolveError> {
        let key = lookup_key(username, self.case_sensitive);

        if let Some(id) = self.users.read().get(&key) {
            return Ok(*id);
        }

        if self.provision_unknown_users {
            return self.provision(key);
        }

        tracing::debug!(username = %username, "Username not found in directory");
        Err(ResolveError::rejected("unknown user"))
    }
}
