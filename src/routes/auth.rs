//! Session routes.
//!
//! - `/user/login/sso` - explicit SSO login, for sites without seamless login
//! - `/user/logout` - end the local session
//! - `/whoami` - the principal behind the session cookie

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    AppState,
    auth::{AuthenticationOutcome, GateError, Principal, RequestContext},
    config::is_internal_path,
    middleware::{removal_cookie, session_cookie},
};

pub fn get_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/user/login/sso", get(sso_login))
        .route("/user/logout", get(logout))
        .route("/whoami", get(whoami))
}

/// Query parameters for the SSO login route.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Internal path to return to after login. Defaults to the front page.
    pub destination: Option<String>,
}

/// Explicit SSO login.
///
/// The route is excluded from seamless SSO, so this is the only place a
/// login happens for it. A user who is already logged in is sent on without
/// a new session.
#[tracing::instrument(name = "auth.sso_login", skip_all)]
pub async fn sso_login(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LoginQuery>,
    ctx: Option<Extension<RequestContext>>,
) -> Result<Response, GateError> {
    let Some(Extension(ctx)) = ctx else {
        return Err(GateError::Internal(
            "SSO login route mounted without sso_auth_middleware".into(),
        ));
    };

    let frontpage_path = || state.authenticator.snapshot().config.frontpage_path.clone();
    let destination = match query.destination.as_deref() {
        Some(dest) if is_internal_path(dest) => dest.to_string(),
        Some(dest) => {
            tracing::debug!(destination = %dest, "Ignoring external login destination");
            frontpage_path()
        }
        None => frontpage_path(),
    };

    match state.authenticator.authenticate_explicit(&ctx).await {
        AuthenticationOutcome::Authenticated { principal, session } => {
            cookies.add(session_cookie(&state.config.server.session, &session));
            tracing::info!(
                username = %principal.username,
                principal_id = %principal.id,
                "SSO login via explicit route"
            );

            let mut response = Redirect::to(&destination).into_response();
            if state.config.sso.enable_login_confirmation_message {
                crate::middleware::insert_login_message(response.headers_mut(), &principal);
            }
            Ok(response)
        }
        AuthenticationOutcome::Rejected(_) => Err(GateError::SsoRejected),
        AuthenticationOutcome::NotApplicable if ctx.is_authenticated() => {
            Ok(Redirect::to(&destination).into_response())
        }
        AuthenticationOutcome::NotApplicable => Err(GateError::MissingIdentity),
    }
}

/// End the local session and redirect.
///
/// The proxy still asserts the identity afterwards, which is why the
/// destination should normally be a path excluded from SSO.
#[tracing::instrument(name = "auth.logout", skip_all)]
pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Redirect {
    let session_config = &state.config.server.session;

    if let Some(cookie) = cookies.get(&session_config.cookie_name) {
        state.authenticator.logout(cookie.value()).await;
    }
    cookies.remove(removal_cookie(session_config));

    Redirect::to(state.config.sso.logout_destination())
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn whoami(State(state): State<AppState>, cookies: Cookies) -> Json<WhoAmI> {
    let session = match cookies.get(&state.config.server.session.cookie_name) {
        Some(cookie) => state.sessions.get(cookie.value()).await,
        None => None,
    };

    Json(match session {
        Some(session) => WhoAmI {
            authenticated: true,
            principal: Some(session.principal),
            expires_at: Some(session.expires_at),
        },
        None => WhoAmI {
            authenticated: false,
            principal: None,
            expires_at: None,
        },
    })
}
