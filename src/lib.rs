//! Single sign-on gate.
//!
//! Sits behind an authenticating reverse proxy (Kerberos or NTLM via
//! `REMOTE_USER`) and turns the identity it asserts into a local session.
//! The decision logic lives in [`auth`]; everything else wires it into an
//! axum service.

pub mod auth;
pub mod cache;
pub mod config;
pub mod directory;
pub mod middleware;
pub mod observability;
pub mod routes;

use std::sync::Arc;

use axum::{Router, routing::get};
use ipnet::IpNet;
use tower_http::trace::TraceLayer;

use crate::{
    auth::{
        IdentityResolver, MemorySessionStore, SsoAuthenticator, SwappableConfig,
        TracingDiagnostics,
    },
    config::{ConfigError, SsoGateConfig, SsoSettings},
    directory::StaticDirectory,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SsoGateConfig>,
    /// The SSO engine, wired to the collaborators below.
    pub authenticator: Arc<SsoAuthenticator>,
    /// Session storage shared by the authenticator and the routes.
    pub sessions: Arc<MemorySessionStore>,
    /// Live SSO settings, replaced by [`AppState::reload_sso`].
    pub sso_config: Arc<SwappableConfig>,
    /// `server.trusted_proxies.cidrs`, parsed once at startup.
    pub trusted_cidrs: Arc<[IpNet]>,
}

impl AppState {
    /// Build the state with the directory from the `[directory]` section.
    pub fn from_config(config: SsoGateConfig) -> Result<Self, ConfigError> {
        let directory = Arc::new(StaticDirectory::from_config(&config.directory));
        tracing::debug!(users = directory.len(), "Loaded static directory");
        Self::with_resolver(config, directory)
    }

    /// Build the state around a custom identity resolver.
    pub fn with_resolver(
        config: SsoGateConfig,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self, ConfigError> {
        let sso_config = Arc::new(
            SwappableConfig::new(config.sso.to_sso_config())
                .map_err(|e| ConfigError::Validation(format!("Invalid sso.excluded_paths: {e}")))?,
        );
        let sessions = Arc::new(MemorySessionStore::new(config.server.session.duration()));

        let authenticator = SsoAuthenticator::new(
            sso_config.clone(),
            sessions.clone(),
            resolver,
            sessions.clone(),
            Arc::new(TracingDiagnostics),
        )
        .with_resolve_timeout(config.server.resolve_timeout());

        let trusted_cidrs: Arc<[IpNet]> = config.server.trusted_proxies.parsed_cidrs().into();

        Ok(Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            sessions,
            sso_config,
            trusted_cidrs,
        })
    }

    /// Publish new SSO settings to the authenticator.
    ///
    /// Only the engine settings are live: the identity variable, realm and
    /// domain handling, exclusions and the front page. The remaining
    /// `[sso]` switches are read from the startup config and need a restart.
    pub fn reload_sso(&self, settings: &SsoSettings) -> Result<(), ConfigError> {
        self.sso_config
            .publish(settings.to_sso_config())
            .map_err(|e| ConfigError::Validation(format!("Invalid sso.excluded_paths: {e}")))?;

        let startup = &self.config.sso;
        if settings.seamless_login != startup.seamless_login
            || settings.enable_login_confirmation_message
                != startup.enable_login_confirmation_message
            || settings.logout_destination() != startup.logout_destination()
        {
            tracing::warn!(
                "Reloaded [sso] changes seamless_login, login messages or the logout \
                 redirect; those take effect after a restart"
            );
        }
        Ok(())
    }
}

/// Assemble the HTTP service.
///
/// Layers run outermost first: tracing, request id, cookies, SSO
/// authentication, then cache admission closest to the handlers.
pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness));

    if state.config.observability.metrics.enabled {
        app = app.route("/metrics", get(routes::health::metrics));
    }

    app.merge(routes::get_auth_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::cache_admission_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::sso_auth_middleware,
        ))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{config, request_from, set_cookie};

    #[tokio::test]
    async fn test_reload_sso_takes_effect_on_next_request() {
        let state = AppState::from_config(config()).unwrap();
        let app = build_app(state.clone());

        let before = app
            .clone()
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header("remote_user", "alice"),
            ))
            .await
            .unwrap();
        assert!(set_cookie(&before).is_some());

        let mut settings = state.config.sso.clone();
        settings.excluded_paths = vec!["/health/*".into()];
        state.reload_sso(&settings).unwrap();
        assert_eq!(state.authenticator.snapshot().matcher.pattern_count(), 1);

        let after = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header("remote_user", "alice"),
            ))
            .await
            .unwrap();
        assert_eq!(after.status(), StatusCode::OK);
        assert!(set_cookie(&after).is_none());
    }

    #[tokio::test]
    async fn test_reload_sso_switches_identity_variable() {
        let state = AppState::from_config(config()).unwrap();
        let app = build_app(state.clone());

        let mut settings = state.config.sso.clone();
        settings.sso_variable = "X_REMOTE_IDENTITY".into();
        state.reload_sso(&settings).unwrap();

        let old_header = app
            .clone()
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header("remote_user", "alice"),
            ))
            .await
            .unwrap();
        assert!(set_cookie(&old_header).is_none());

        let new_header = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header("x_remote_identity", "alice"),
            ))
            .await
            .unwrap();
        assert!(set_cookie(&new_header).is_some());
        assert_eq!(state.sessions.len().await, 1);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, Response},
    };
    use http_body_util::BodyExt;

    use crate::config::SsoGateConfig;

    /// A config with two known users and a trusted proxy at 10.0.0.0/8.
    pub fn config() -> SsoGateConfig {
        let mut config = SsoGateConfig::default();
        config.server.trusted_proxies.cidrs = vec!["10.0.0.0/8".into()];
        config.server.session.secure = false;
        config.sso.seamless_login = true;
        config.sso.split_user_realm = true;
        config.directory.users.insert("alice".into(), 1);
        config.directory.users.insert("bob".into(), 2);
        config
    }

    /// A request that arrived over TCP from `peer`.
    pub fn request_from(peer: &str, builder: http::request::Builder) -> Request<Body> {
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` of the first Set-Cookie header, if any.
    pub fn set_cookie(response: &Response<Body>) -> Option<String> {
        response
            .headers()
            .get(http::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(String::from)
    }
}
