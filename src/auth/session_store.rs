//! In-memory session storage.
//!
//! Suitable for single-node deployments. Sessions are lost on restart and not
//! shared across nodes.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    EstablishedSession, Principal, PrincipalId, SessionEstablisher, SessionError, SessionInspector,
    SessionResult,
};

/// A logged-in session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoSession {
    /// Session ID, also the cookie value.
    pub id: Uuid,

    /// The principal the session belongs to.
    pub principal: Principal,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session expires
    pub expires_at: DateTime<Utc>,
}

impl SsoSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// In-memory session store.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SsoSession>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a live session. Malformed and expired tokens yield `None`.
    pub async fn get(&self, token: &str) -> Option<SsoSession> {
        let id = Uuid::parse_str(token).ok()?;
        let sessions = self.sessions.read().await;
        sessions.get(&id).filter(|s| !s.is_expired()).cloned()
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionInspector for MemorySessionStore {
    async fn has_session(&self, token: &str) -> bool {
        self.get(token).await.is_some()
    }

    async fn session_user_id(&self, token: &str) -> Option<PrincipalId> {
        self.get(token).await.map(|s| s.principal.id)
    }
}

#[async_trait]
impl SessionEstablisher for MemorySessionStore {
    async fn finalize(&self, principal: &Principal) -> SessionResult<EstablishedSession> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| SessionError::Unavailable(format!("invalid session ttl: {e}")))?;
        let now = Utc::now();
        let session = SsoSession {
            id: Uuid::new_v4(),
            principal: principal.clone(),
            created_at: now,
            expires_at: now + ttl,
        };
        let established = EstablishedSession {
            token: session.id.to_string(),
            expires_at: session.expires_at,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);
        Ok(established)
    }

    async fn terminate(&self, token: &str) -> SessionResult<()> {
        let Ok(id) = Uuid::parse_str(token) else {
            return Ok(());
        };
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        Ok(())
    }
}
