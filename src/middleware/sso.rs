//! Seamless SSO for every request.
//!
//! The SSO header is only believed when the TCP peer is a trusted proxy.
//! Anything else carrying it is turned away with a Negotiate challenge.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration as CookieDuration},
};

use crate::{
    AppState,
    auth::{AuthenticationOutcome, EstablishedSession, GateError, Principal, RequestContext},
    config::SessionCookieConfig,
    observability::metrics,
};

/// Response header carrying the login confirmation.
pub const LOGIN_MESSAGE_HEADER: &str = "x-login-message";

/// Attempt SSO, attach the session principal, and translate downstream
/// access denials on SSO requests into authentication challenges.
///
/// Inserts the [`RequestContext`] into request extensions for later layers,
/// and the [`Principal`] when the request is logged in.
pub async fn sso_auth_middleware(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Result<Response, GateError> {
    let snapshot = state.authenticator.snapshot();
    let sso_variable = snapshot.config.sso_variable.as_str();

    let connecting_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let trusted = is_trusted_origin(&state, connecting_ip);
    if !trusted && has_sso_header(req.headers(), sso_variable) {
        tracing::warn!(
            connecting_ip = ?connecting_ip,
            sso_variable = %sso_variable,
            "Rejecting SSO identity header from untrusted origin - \
             configure server.trusted_proxies to trust this source"
        );
        metrics::record_untrusted_sso_header();
        return Err(GateError::UntrustedOrigin);
    }

    let session_config = &state.config.server.session;
    let token = cookies
        .get(&session_config.cookie_name)
        .map(|c| c.value().to_string());
    let session = state.authenticator.inspect_session(token.as_deref()).await;

    let ctx = RequestContext::from_http(req.uri(), req.headers(), sso_variable, trusted, session);
    let sso_bearing = ctx.server_variable(sso_variable).is_some();

    let mut logged_in = None;
    if state.config.sso.seamless_login {
        match state.authenticator.authenticate(&ctx).await {
            AuthenticationOutcome::Authenticated { principal, session } => {
                cookies.add(session_cookie(session_config, &session));
                logged_in = Some(principal);
            }
            AuthenticationOutcome::Rejected(rejection) => {
                tracing::debug!(rejection = ?rejection, path = %ctx.path(), "Seamless SSO rejected");
                return Err(GateError::SsoRejected);
            }
            AuthenticationOutcome::NotApplicable => {}
        }
    }

    let principal = match (&logged_in, token.as_deref()) {
        (Some(principal), _) => Some(principal.clone()),
        (None, Some(token)) if ctx.is_authenticated() => {
            state.sessions.get(token).await.map(|s| s.principal)
        }
        _ => None,
    };
    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;

    if sso_bearing && response.status() == StatusCode::FORBIDDEN {
        tracing::debug!("Downstream denied an SSO request, challenging instead");
        return Err(GateError::AccessDenied);
    }

    if let Some(principal) = logged_in
        && state.config.sso.enable_login_confirmation_message
    {
        insert_login_message(response.headers_mut(), &principal);
    }

    Ok(response)
}

/// Whether the SSO header may be believed from this peer.
///
/// With no trusted proxies configured every peer is trusted; the config
/// loader warns about that setup.
fn is_trusted_origin(state: &AppState, connecting_ip: Option<IpAddr>) -> bool {
    let trusted_proxies = &state.config.server.trusted_proxies;
    if !trusted_proxies.is_configured() {
        return true;
    }
    match connecting_ip {
        Some(ip) => trusted_proxies.is_trusted_ip(ip, &state.trusted_cidrs),
        None => trusted_proxies.dangerously_trust_all,
    }
}

/// Presence check, including values that are not valid text.
pub(crate) fn has_sso_header(headers: &HeaderMap, sso_variable: &str) -> bool {
    HeaderName::try_from(sso_variable).is_ok_and(|name| headers.contains_key(name))
}

pub(crate) fn insert_login_message(headers: &mut HeaderMap, principal: &Principal) {
    let message = format!("You have been logged in as {}", principal.username);
    match HeaderValue::from_str(&message) {
        Ok(value) => {
            headers.insert(LOGIN_MESSAGE_HEADER, value);
        }
        Err(_) => {
            headers.insert(
                LOGIN_MESSAGE_HEADER,
                HeaderValue::from_static("You have been logged in"),
            );
        }
    }
}

/// The cookie issued after a successful SSO login.
pub fn session_cookie(config: &SessionCookieConfig, session: &EstablishedSession) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session.token.clone()))
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(config.duration_secs as i64))
        .build()
}

/// A cookie that clears the session cookie, with matching attributes.
pub fn removal_cookie(config: &SessionCookieConfig) -> Cookie<'static> {
    Cookie::build(config.cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension, Router,
        http::{Request, header},
        routing::get,
    };
    use tower::ServiceExt;
    use tower_cookies::CookieManagerLayer;

    use super::*;
    use crate::{
        config::SsoGateConfig,
        test_support::{body_json, config, request_from, set_cookie},
    };

    async fn whoami(principal: Option<Extension<Principal>>) -> String {
        principal
            .map(|Extension(p)| p.username)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(config: SsoGateConfig) -> (Router, AppState) {
        let state = AppState::from_config(config).unwrap();
        let router = Router::new()
            .route("/page", get(whoami))
            .route("/public/info", get(whoami))
            .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                sso_auth_middleware,
            ))
            .layer(CookieManagerLayer::new())
            .with_state(state.clone());
        (router, state)
    }

    async fn body_text(response: Response) -> String {
        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_trusted_proxy_identity_logs_in() {
        let (app, state) = app(config());

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", "alice@EXAMPLE.COM"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = set_cookie(&response).unwrap();
        assert!(cookie.starts_with("__sso_session="));
        assert_eq!(body_text(response).await, "alice");
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_untrusted_peer_with_header_is_challenged() {
        let (app, state) = app(config());

        let response = app
            .oneshot(request_from(
                "192.168.1.5",
                Request::get("/page").header("remote_user", "alice"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Negotiate"
        );
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "untrusted_origin");
        assert_eq!(json["error"]["message"], "Invalid consumer origin.");
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_untrusted_peer_without_header_passes() {
        let (app, _) = app(config());

        let response = app
            .oneshot(request_from("192.168.1.5", Request::get("/page")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_missing_connect_info_is_untrusted() {
        let (app, _) = app(config());

        let response = app
            .oneshot(
                Request::get("/page")
                    .header("remote_user", "alice")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_trusted_proxies_trusts_everyone() {
        let mut config = config();
        config.server.trusted_proxies.cidrs.clear();
        let (app, _) = app(config);

        let response = app
            .oneshot(request_from(
                "192.168.1.5",
                Request::get("/page").header("remote_user", "bob"),
            ))
            .await
            .unwrap();

        assert_eq!(body_text(response).await, "bob");
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let (app, state) = app(config());

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", "mallory"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie(&response).is_none());
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "sso_rejected");
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_on_every_request_except_exclusions() {
        let mut config = config();
        config.sso.excluded_paths = vec!["/public/*".into()];
        let (app, state) = app(config);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request_from(
                    "10.1.2.3",
                    Request::get("/page").header("remote_user", "mallory"),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/public/info").header("remote_user", "mallory"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_seamless_login_off_never_authenticates() {
        let mut config = config();
        config.sso.seamless_login = false;
        let (app, state) = app(config);

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", "alice"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response).is_none());
        assert_eq!(body_text(response).await, "anonymous");
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_excluded_path_is_not_authenticated() {
        let mut config = config();
        config.sso.excluded_paths = vec!["/public/*".into()];
        let (app, _) = app(config);

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/public/info").header("remote_user", "alice"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_existing_session_is_reused() {
        let (app, state) = app(config());

        let first = app
            .clone()
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", "alice"),
            ))
            .await
            .unwrap();
        let cookie = set_cookie(&first).unwrap();

        let second = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page")
                    .header("remote_user", "alice")
                    .header(header::COOKIE, &cookie),
            ))
            .await
            .unwrap();

        assert_eq!(second.status(), StatusCode::OK);
        assert!(set_cookie(&second).is_none());
        assert_eq!(body_text(second).await, "alice");
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_downstream_forbidden_becomes_challenge() {
        let (app, _) = app(config());

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/forbidden").header("remote_user", "alice"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "authentication_required");
    }

    #[tokio::test]
    async fn test_forbidden_without_sso_header_stays_forbidden() {
        let (app, _) = app(config());

        let response = app
            .oneshot(request_from("10.1.2.3", Request::get("/forbidden")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_login_confirmation_message() {
        let mut config = config();
        config.sso.enable_login_confirmation_message = true;
        let (app, _) = app(config);

        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", "bob@EXAMPLE.COM"),
            ))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(LOGIN_MESSAGE_HEADER).unwrap(),
            "You have been logged in as bob"
        );
    }

    #[test]
    fn test_has_sso_header() {
        let mut headers = HeaderMap::new();
        headers.insert("remote_user", HeaderValue::from_static(""));
        assert!(has_sso_header(&headers, "REMOTE_USER"));
        assert!(!has_sso_header(&headers, "REDIRECT_REMOTE_USER"));
        assert!(!has_sso_header(&headers, "not a header"));
    }

    #[test]
    fn test_removal_cookie_expires_immediately() {
        let cookie = removal_cookie(&SessionCookieConfig::default());
        assert_eq!(cookie.name(), "__sso_session");
        assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
        assert_eq!(cookie.secure(), Some(true));
    }
}
