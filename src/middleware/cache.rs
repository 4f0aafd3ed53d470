use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};

use super::sso::has_sso_header;
use crate::{
    AppState,
    auth::RequestContext,
    cache::{CacheAdmissionPolicy, CacheDecision},
    observability::metrics,
};

/// Mark responses that must not be stored by a shared cache.
///
/// Reads the session state from the [`RequestContext`] left by
/// [`sso_auth_middleware`](super::sso_auth_middleware); without it the
/// request is treated as sessionless. The decision is stored in request
/// extensions for handlers.
pub async fn cache_admission_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let snapshot = state.authenticator.snapshot();
    let has_session = req
        .extensions()
        .get::<RequestContext>()
        .is_some_and(RequestContext::has_session);
    let header_present = has_sso_header(req.headers(), &snapshot.config.sso_variable);

    let decision = CacheAdmissionPolicy::check(has_session, header_present);
    metrics::record_cache_decision(decision.as_str());
    req.extensions_mut().insert(decision);

    let mut response = next.run(req).await;
    if decision == CacheDecision::Deny {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private, no-store"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension, Router,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{config, request_from, set_cookie};

    async fn decision(Extension(decision): Extension<CacheDecision>) -> &'static str {
        decision.as_str()
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/page", get(decision))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                cache_admission_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_anonymous_request_is_cacheable() {
        let state = AppState::from_config(config()).unwrap();

        let response = app(state)
            .oneshot(request_from("10.1.2.3", Request::get("/page")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn test_sso_header_denies_even_when_empty() {
        let state = AppState::from_config(config()).unwrap();

        let response = app(state)
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/page").header("remote_user", ""),
            ))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "private, no-store"
        );
    }

    #[tokio::test]
    async fn test_session_denies_through_full_stack() {
        let mut config = config();
        config.sso.seamless_login = true;
        let app = crate::build_app(AppState::from_config(config).unwrap());

        let login = app
            .clone()
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header("remote_user", "alice"),
            ))
            .await
            .unwrap();
        let cookie = set_cookie(&login).unwrap();
        assert_eq!(
            login.headers().get(header::CACHE_CONTROL).unwrap(),
            "private, no-store"
        );

        // Session only, no header.
        let response = app
            .oneshot(request_from(
                "10.1.2.3",
                Request::get("/health/live").header(header::COOKIE, &cookie),
            ))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "private, no-store"
        );
    }
}
