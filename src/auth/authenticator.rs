//! SSO authentication orchestration.
//!
//! ```text
//! RequestContext
//!     │
//!     ▼
//! applicability ──no──▶ NotApplicable
//!     │ yes
//!     ▼
//! raw identity ──▶ split realm? ──▶ strip domain? ──▶ IdentityResolver
//!                                                        │
//!                              Rejected ◀──error─────────┤
//!                                                        ▼ ok
//!                                           SessionEstablisher::finalize
//!                                                        │
//!                                                        ▼
//!                                                  Authenticated
//! ```

use std::{sync::Arc, time::Duration};

use super::{
    ConfigProvider, DiagnosticsSink, EstablishedSession, IdentityResolver, NormalizedIdentity,
    Principal, RawIdentity, RequestContext, ResolveError, SessionEstablisher, SessionInspector,
    SessionState, SsoConfig, SsoSnapshot, applicability,
};
use crate::observability::metrics;

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of an SSO attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// The identity was accepted and a session was created.
    Authenticated {
        principal: Principal,
        session: EstablishedSession,
    },
    /// SSO was attempted and failed. Other login mechanisms must not run.
    Rejected(Rejection),
    /// SSO was not attempted. Other login mechanisms may proceed.
    NotApplicable,
}

impl AuthenticationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationOutcome::Authenticated { .. } => "authenticated",
            AuthenticationOutcome::Rejected(Rejection::Denied) => "rejected",
            AuthenticationOutcome::Rejected(Rejection::CollaboratorFailure) => {
                "collaborator_failure"
            }
            AuthenticationOutcome::NotApplicable => "not_applicable",
        }
    }
}

/// Why an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The directory does not accept the identity.
    Denied,
    /// The resolver or session store failed or timed out.
    CollaboratorFailure,
}

/// Turns proxy-asserted identities into local logins.
pub struct SsoAuthenticator {
    config: Arc<dyn ConfigProvider>,
    sessions: Arc<dyn SessionInspector>,
    resolver: Arc<dyn IdentityResolver>,
    establisher: Arc<dyn SessionEstablisher>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    resolve_timeout: Duration,
}

impl SsoAuthenticator {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        sessions: Arc<dyn SessionInspector>,
        resolver: Arc<dyn IdentityResolver>,
        establisher: Arc<dyn SessionEstablisher>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            config,
            sessions,
            resolver,
            establisher,
            diagnostics,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Bound each collaborator call. Calls that run out are not retried.
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// The current configuration snapshot.
    pub fn snapshot(&self) -> Arc<SsoSnapshot> {
        self.config.get()
    }

    /// Resolve the session behind a session cookie.
    pub async fn inspect_session(&self, token: Option<&str>) -> SessionState {
        let Some(token) = token else {
            return SessionState::anonymous();
        };
        if !self.sessions.has_session(token).await {
            return SessionState::anonymous();
        }
        SessionState {
            has_session: true,
            user_id: self.sessions.session_user_id(token).await,
        }
    }

    /// End a session on logout.
    pub async fn logout(&self, token: &str) {
        if let Err(e) = self.establisher.terminate(token).await {
            self.diagnostics.record(
                "sso.collaborator_failure",
                &[("stage", "terminate"), ("error", e.to_string().as_str())],
            );
        }
    }

    /// Whether SSO should be attempted for `ctx`.
    pub fn applies(&self, ctx: &RequestContext) -> bool {
        let snapshot = self.config.get();
        applicability::applies(ctx, &snapshot.config, &snapshot.matcher)
    }

    /// Automatic SSO for an arbitrary request.
    pub async fn authenticate(&self, ctx: &RequestContext) -> AuthenticationOutcome {
        let snapshot = self.config.get();

        let decision = applicability::evaluate(ctx, &snapshot.config, &snapshot.matcher);
        if !decision.is_applicable() {
            self.diagnostics.record(
                "sso.not_applicable",
                &[("path", ctx.path()), ("reason", decision.as_str())],
            );
            return self.finish(AuthenticationOutcome::NotApplicable);
        }

        self.attempt(ctx, &snapshot.config).await
    }

    /// SSO on the dedicated login route.
    ///
    /// Path and host exclusions are skipped since the route itself is
    /// excluded from automatic SSO. Requests from a logged-in user or without
    /// an identity are still not applicable.
    pub async fn authenticate_explicit(&self, ctx: &RequestContext) -> AuthenticationOutcome {
        let snapshot = self.config.get();

        if ctx.is_authenticated() {
            self.diagnostics.record(
                "sso.not_applicable",
                &[("path", ctx.path()), ("reason", "already_authenticated")],
            );
            return self.finish(AuthenticationOutcome::NotApplicable);
        }

        self.attempt(ctx, &snapshot.config).await
    }

    async fn attempt(&self, ctx: &RequestContext, cfg: &SsoConfig) -> AuthenticationOutcome {
        let Some(value) = ctx
            .server_variable(&cfg.sso_variable)
            .filter(|v| !v.is_empty())
        else {
            self.diagnostics.record(
                "sso.identity_missing",
                &[("sso_variable", cfg.sso_variable.as_str())],
            );
            return self.finish(AuthenticationOutcome::NotApplicable);
        };

        let raw = RawIdentity::new(value);
        let identity =
            NormalizedIdentity::from_raw(&raw, cfg.split_user_realm, cfg.strip_domain_name);
        self.diagnostics.record(
            "sso.normalized",
            &[
                ("raw", raw.value.as_str()),
                ("username", identity.username.as_str()),
                ("realm", identity.realm.as_deref().unwrap_or("")),
            ],
        );

        if identity.username.is_empty() {
            self.diagnostics.record(
                "sso.rejected",
                &[("raw", raw.value.as_str()), ("reason", "empty username")],
            );
            return self.finish(AuthenticationOutcome::Rejected(Rejection::Denied));
        }

        let id = match tokio::time::timeout(
            self.resolve_timeout,
            self.resolver.resolve(&identity.username),
        )
        .await
        {
            Ok(Ok(id)) => id,
            Ok(Err(ResolveError::Rejected { reason })) => {
                self.diagnostics.record(
                    "sso.rejected",
                    &[
                        ("username", identity.username.as_str()),
                        ("reason", reason.as_str()),
                    ],
                );
                return self.finish(AuthenticationOutcome::Rejected(Rejection::Denied));
            }
            Ok(Err(ResolveError::Unavailable(error))) => {
                return self.collaborator_failure("resolve", &identity.username, &error);
            }
            Err(_) => {
                return self.collaborator_failure("resolve", &identity.username, "timed out");
            }
        };

        let principal = Principal {
            id,
            username: identity.username,
            realm: identity.realm,
        };

        let session = match tokio::time::timeout(
            self.resolve_timeout,
            self.establisher.finalize(&principal),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return self.collaborator_failure("finalize", &principal.username, &e.to_string());
            }
            Err(_) => {
                return self.collaborator_failure("finalize", &principal.username, "timed out");
            }
        };

        self.diagnostics.record(
            "sso.authenticated",
            &[
                ("username", principal.username.as_str()),
                ("principal_id", principal.id.to_string().as_str()),
            ],
        );
        self.finish(AuthenticationOutcome::Authenticated { principal, session })
    }

    fn collaborator_failure(
        &self,
        stage: &str,
        username: &str,
        error: &str,
    ) -> AuthenticationOutcome {
        self.diagnostics.record(
            "sso.collaborator_failure",
            &[("stage", stage), ("username", username), ("error", error)],
        );
        self.finish(AuthenticationOutcome::Rejected(
            Rejection::CollaboratorFailure,
        ))
    }

    fn finish(&self, outcome: AuthenticationOutcome) -> AuthenticationOutcome {
        metrics::record_sso_outcome(outcome.as_str());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::auth::{
        MemorySessionStore, PrincipalId, SessionError, SessionResult, SwappableConfig,
    };

    /// Resolver that records every username it is asked about.
    struct FakeResolver {
        result: Result<PrincipalId, ResolveError>,
        delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn accepting(id: u64) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(PrincipalId::new(id).unwrap()),
                delay: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: ResolveError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(error),
                delay: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(PrincipalId::new(1).unwrap()),
                delay: Some(delay),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl IdentityResolver for FakeResolver {
        async fn resolve(&self, username: &str) -> Result<PrincipalId, ResolveError> {
            self.calls.lock().push(username.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    /// Session establisher that counts finalize calls.
    struct CountingEstablisher {
        inner: MemorySessionStore,
        finalized: AtomicUsize,
        fail: bool,
    }

    impl CountingEstablisher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: MemorySessionStore::new(Duration::from_secs(60)),
                finalized: AtomicUsize::new(0),
                fail,
            })
        }

        fn finalized(&self) -> usize {
            self.finalized.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionEstablisher for CountingEstablisher {
        async fn finalize(&self, principal: &Principal) -> SessionResult<EstablishedSession> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SessionError::Unavailable("store offline".into()));
            }
            self.inner.finalize(principal).await
        }

        async fn terminate(&self, token: &str) -> SessionResult<()> {
            self.inner.terminate(token).await
        }
    }

    #[derive(Default)]
    struct RecordingDiagnostics {
        events: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl RecordingDiagnostics {
        fn events(&self) -> Vec<String> {
            self.events.lock().iter().map(|(e, _)| e.clone()).collect()
        }

        fn field(&self, event: &str, key: &str) -> Option<String> {
            self.events
                .lock()
                .iter()
                .find(|(e, _)| e == event)
                .and_then(|(_, fields)| fields.iter().find(|(k, _)| k == key))
                .map(|(_, v)| v.clone())
        }
    }

    impl DiagnosticsSink for RecordingDiagnostics {
        fn record(&self, event: &str, fields: &[(&str, &str)]) {
            self.events.lock().push((
                event.to_string(),
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
        }
    }

    struct Harness {
        authenticator: SsoAuthenticator,
        resolver: Arc<FakeResolver>,
        establisher: Arc<CountingEstablisher>,
        diagnostics: Arc<RecordingDiagnostics>,
    }

    fn harness_with(
        config: SsoConfig,
        resolver: Arc<FakeResolver>,
        establisher: Arc<CountingEstablisher>,
    ) -> Harness {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let authenticator = SsoAuthenticator::new(
            Arc::new(SwappableConfig::new(config).unwrap()),
            sessions,
            resolver.clone(),
            establisher.clone(),
            diagnostics.clone(),
        )
        .with_resolve_timeout(Duration::from_millis(200));

        Harness {
            authenticator,
            resolver,
            establisher,
            diagnostics,
        }
    }

    fn realm_config() -> SsoConfig {
        SsoConfig {
            sso_variable: "REMOTE_USER".into(),
            split_user_realm: true,
            strip_domain_name: false,
            ..SsoConfig::default()
        }
    }

    fn harness(config: SsoConfig) -> Harness {
        harness_with(
            config,
            FakeResolver::accepting(42),
            CountingEstablisher::new(false),
        )
    }

    fn request(path: &str, identity: &str) -> RequestContext {
        RequestContext::builder()
            .path(path)
            .server_name("www.example.com")
            .server_variable("REMOTE_USER", identity)
            .build()
    }

    #[tokio::test]
    async fn test_realm_identity_resolved_by_username() {
        let h = harness(realm_config());
        let ctx = request("/node/5", "bob@CORP");

        assert!(h.authenticator.applies(&ctx));
        let outcome = h.authenticator.authenticate(&ctx).await;

        let AuthenticationOutcome::Authenticated { principal, session } = outcome else {
            panic!("expected an authenticated outcome");
        };
        assert_eq!(principal.id.get(), 42);
        assert_eq!(principal.username, "bob");
        assert_eq!(principal.realm.as_deref(), Some("CORP"));
        assert!(!session.token.is_empty());

        assert_eq!(h.resolver.calls(), vec!["bob"]);
        assert_eq!(h.establisher.finalized(), 1);
        assert!(h.diagnostics.events().contains(&"sso.authenticated".to_string()));
    }

    #[tokio::test]
    async fn test_excluded_path_never_calls_resolver() {
        let h = harness(realm_config());
        let ctx = request("/user/logout", "bob@CORP");

        assert!(!h.authenticator.applies(&ctx));
        assert_eq!(
            h.authenticator.authenticate(&ctx).await,
            AuthenticationOutcome::NotApplicable
        );
        assert!(h.resolver.calls().is_empty());
        assert_eq!(h.establisher.finalized(), 0);
        assert_eq!(
            h.diagnostics.field("sso.not_applicable", "reason").as_deref(),
            Some("built_in_path")
        );
    }

    #[tokio::test]
    async fn test_logged_in_user_not_applicable() {
        let h = harness(realm_config());
        let ctx = RequestContext::builder()
            .path("/node/5")
            .server_variable("REMOTE_USER", "bob@CORP")
            .logged_in_as(PrincipalId::new(9).unwrap())
            .build();

        assert_eq!(
            h.authenticator.authenticate(&ctx).await,
            AuthenticationOutcome::NotApplicable
        );
        assert_eq!(
            h.authenticator.authenticate_explicit(&ctx).await,
            AuthenticationOutcome::NotApplicable
        );
        assert!(h.resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_directory_rejection() {
        let h = harness_with(
            realm_config(),
            FakeResolver::failing(ResolveError::rejected("no such user")),
            CountingEstablisher::new(false),
        );

        let outcome = h.authenticator.authenticate(&request("/", "eve")).await;

        assert_eq!(outcome, AuthenticationOutcome::Rejected(Rejection::Denied));
        assert_eq!(h.resolver.calls(), vec!["eve"]);
        assert_eq!(h.establisher.finalized(), 0);
        assert!(h.diagnostics.events().contains(&"sso.rejected".to_string()));
        assert!(
            !h.diagnostics
                .events()
                .contains(&"sso.collaborator_failure".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolver_outage_is_collaborator_failure() {
        let h = harness_with(
            realm_config(),
            FakeResolver::failing(ResolveError::Unavailable("connection refused".into())),
            CountingEstablisher::new(false),
        );

        let outcome = h.authenticator.authenticate(&request("/", "alice")).await;

        assert_eq!(
            outcome,
            AuthenticationOutcome::Rejected(Rejection::CollaboratorFailure)
        );
        assert_eq!(
            h.diagnostics
                .field("sso.collaborator_failure", "stage")
                .as_deref(),
            Some("resolve")
        );
        assert_eq!(h.resolver.calls().len(), 1, "resolver must not be retried");
    }

    #[tokio::test]
    async fn test_resolver_timeout_is_collaborator_failure() {
        let h = harness_with(
            realm_config(),
            FakeResolver::slow(Duration::from_secs(5)),
            CountingEstablisher::new(false),
        );

        let outcome = h.authenticator.authenticate(&request("/", "alice")).await;

        assert_eq!(
            outcome,
            AuthenticationOutcome::Rejected(Rejection::CollaboratorFailure)
        );
        assert_eq!(
            h.diagnostics
                .field("sso.collaborator_failure", "error")
                .as_deref(),
            Some("timed out")
        );
        assert_eq!(h.establisher.finalized(), 0);
    }

    #[tokio::test]
    async fn test_session_failure_is_collaborator_failure() {
        let h = harness_with(
            realm_config(),
            FakeResolver::accepting(3),
            CountingEstablisher::new(true),
        );

        let outcome = h.authenticator.authenticate(&request("/", "alice")).await;

        assert_eq!(
            outcome,
            AuthenticationOutcome::Rejected(Rejection::CollaboratorFailure)
        );
        assert_eq!(h.establisher.finalized(), 1);
        assert_eq!(
            h.diagnostics
                .field("sso.collaborator_failure", "stage")
                .as_deref(),
            Some("finalize")
        );
    }

    #[tokio::test]
    async fn test_empty_normalized_username_rejected() {
        let h = harness(SsoConfig {
            strip_domain_name: true,
            ..SsoConfig::default()
        });

        let outcome = h.authenticator.authenticate(&request("/", "@CORP")).await;

        assert_eq!(outcome, AuthenticationOutcome::Rejected(Rejection::Denied));
        assert!(h.resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_strip_domain_ntlm() {
        let h = harness(SsoConfig {
            strip_domain_name: true,
            ..SsoConfig::default()
        });

        let outcome = h
            .authenticator
            .authenticate(&request("/node/1", r"CORP\carol"))
            .await;

        assert!(matches!(outcome, AuthenticationOutcome::Authenticated { .. }));
        assert_eq!(h.resolver.calls(), vec!["carol"]);
    }

    #[tokio::test]
    async fn test_explicit_login_ignores_exclusions() {
        let h = harness(realm_config());
        let ctx = request("/user/login/sso", "bob@CORP");

        assert_eq!(
            h.authenticator.authenticate(&ctx).await,
            AuthenticationOutcome::NotApplicable
        );

        let outcome = h.authenticator.authenticate_explicit(&ctx).await;
        assert!(matches!(outcome, AuthenticationOutcome::Authenticated { .. }));
        assert_eq!(h.resolver.calls(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_explicit_login_without_identity() {
        let h = harness(realm_config());
        let ctx = RequestContext::builder().path("/user/login/sso").build();

        assert_eq!(
            h.authenticator.authenticate_explicit(&ctx).await,
            AuthenticationOutcome::NotApplicable
        );
        assert!(h.diagnostics.events().contains(&"sso.identity_missing".to_string()));
    }

    #[tokio::test]
    async fn test_inspect_session() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let authenticator = SsoAuthenticator::new(
            Arc::new(SwappableConfig::new(SsoConfig::default()).unwrap()),
            store.clone(),
            FakeResolver::accepting(1),
            store.clone(),
            Arc::new(RecordingDiagnostics::default()),
        );
        let session = store
            .finalize(&Principal {
                id: PrincipalId::new(8).unwrap(),
                username: "dave".into(),
                realm: None,
            })
            .await
            .unwrap();

        assert_eq!(
            authenticator.inspect_session(None).await,
            SessionState::anonymous()
        );
        assert_eq!(
            authenticator.inspect_session(Some("bogus")).await,
            SessionState::anonymous()
        );
        let state = authenticator.inspect_session(Some(&session.token)).await;
        assert!(state.has_session);
        assert_eq!(state.user_id, PrincipalId::new(8));

        authenticator.logout(&session.token).await;
        assert!(!store.has_session(&session.token).await);
    }
}
