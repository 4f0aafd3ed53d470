//! Per-request input to the SSO engine.

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, Uri, header};

use super::PrincipalId;

/// How the request entered the application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntryPoint {
    /// The normal front controller. The request path is used as-is.
    #[default]
    FrontController,
    /// A standalone script such as a cron endpoint. Its name, without the
    /// leading slash, is used in place of the request path.
    Script { name: String },
}

/// Session state resolved for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// A session exists, whether or not it belongs to a user.
    pub has_session: bool,
    /// The logged-in user, if the session belongs to one.
    pub user_id: Option<PrincipalId>,
}

impl SessionState {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Immutable snapshot of the request fields SSO decisions depend on.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    path: String,
    server_name: String,
    session: SessionState,
    server_variables: HashMap<String, String>,
    entry_point: EntryPoint,
}

impl RequestContext {
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    /// Build a context from HTTP request parts.
    ///
    /// Only the header named by `sso_variable` is copied into the server
    /// variables, and only when `trust_sso_header` is set. Header values that
    /// are not visible ASCII are dropped.
    pub fn from_http(
        uri: &Uri,
        headers: &HeaderMap,
        sso_variable: &str,
        trust_sso_header: bool,
        session: SessionState,
    ) -> Self {
        let server_name = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default();

        let mut builder = Self::builder()
            .path(uri.path())
            .server_name(server_name)
            .session(session);

        if trust_sso_header
            && let Some(value) = sso_header_value(headers, sso_variable)
        {
            builder = builder.server_variable(sso_variable, value);
        }

        builder.build()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn has_session(&self) -> bool {
        self.session.has_session
    }

    pub fn session_user_id(&self) -> Option<PrincipalId> {
        self.session.user_id
    }

    /// Logged in locally: a session exists and belongs to a user.
    pub fn is_authenticated(&self) -> bool {
        self.session.has_session && self.session.user_id.is_some()
    }

    pub fn server_variable(&self, name: &str) -> Option<&str> {
        self.server_variables.get(name).map(String::as_str)
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    /// The path used for exclusion checks.
    pub fn effective_path(&self) -> &str {
        match &self.entry_point {
            EntryPoint::FrontController => &self.path,
            EntryPoint::Script { name } => name.trim_start_matches('/'),
        }
    }
}

/// Read the SSO header from a request.
///
/// The variable name is used as the header name. Names that are not valid
/// header names never match.
pub fn sso_header_value<'a>(headers: &'a HeaderMap, sso_variable: &str) -> Option<&'a str> {
    let name = HeaderName::try_from(sso_variable).ok()?;
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Builder for [`RequestContext`].
#[derive(Debug, Default)]
pub struct RequestContextBuilder {
    inner: RequestContext,
}

impl RequestContextBuilder {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.inner.path = path.into();
        self
    }

    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.inner.server_name = server_name.into();
        self
    }

    pub fn session(mut self, session: SessionState) -> Self {
        self.inner.session = session;
        self
    }

    /// Mark the request as carrying a session owned by `user_id`.
    pub fn logged_in_as(self, user_id: PrincipalId) -> Self {
        self.session(SessionState {
            has_session: true,
            user_id: Some(user_id),
        })
    }

    pub fn server_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.server_variables.insert(name.into(), value.into());
        self
    }

    pub fn entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.inner.entry_point = entry_point;
        self
    }

    pub fn build(self) -> RequestContext {
        self.inner
    }
}
