use std::fmt;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::observability::metrics;

/// HTTP-facing authentication errors.
#[derive(Debug)]
pub enum GateError {
    /// The SSO identity header arrived from a peer that is not a trusted
    /// proxy. Surfaced as authentication-required so the user agent can
    /// negotiate again instead of treating it as a permanent block.
    UntrustedOrigin,

    /// SSO was attempted and the identity was not accepted. Directory detail
    /// is never included.
    SsoRejected,

    /// The explicit SSO login route was hit without a usable identity.
    MissingIdentity,

    /// A downstream handler denied access to a request that carries an SSO
    /// identity.
    AccessDenied,

    /// Internal error while authenticating.
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_type: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorInfo {
                error_type,
                code,
                message: message.into(),
            },
        }
    }
}

impl GateError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            GateError::UntrustedOrigin => (
                StatusCode::UNAUTHORIZED,
                "untrusted_origin",
                "Invalid consumer origin.".to_string(),
            ),
            GateError::SsoRejected => (
                StatusCode::UNAUTHORIZED,
                "sso_rejected",
                "Single sign-on could not log you in".to_string(),
            ),
            GateError::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                "missing_identity",
                "No single sign-on identity was supplied".to_string(),
            ),
            GateError::AccessDenied => (
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                "Authentication required".to_string(),
            ),
            GateError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal authentication error".to_string(),
            ),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if let GateError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal authentication error");
        }
        metrics::record_gateway_error("auth_failure", code);

        let body = ErrorResponse::new("authentication_error", code, message);
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Negotiate"),
            );
        }
        response
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::UntrustedOrigin => write!(f, "Invalid consumer origin"),
            GateError::SsoRejected => write!(f, "Single sign-on identity rejected"),
            GateError::MissingIdentity => write!(f, "Single sign-on identity missing"),
            GateError::AccessDenied => write!(f, "Access denied to an SSO request"),
            GateError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for GateError {}

/// Errors returned by an identity resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The directory does not accept this username.
    #[error("identity rejected: {reason}")]
    Rejected { reason: String },

    /// The directory could not be queried.
    #[error("identity resolver unavailable: {0}")]
    Unavailable(String),
}

impl ResolveError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session storage unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_untrusted_origin_is_401_with_negotiate() {
        let response = GateError::UntrustedOrigin.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Negotiate"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "untrusted_origin");
        assert_eq!(body["error"]["message"], "Invalid consumer origin.");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = GateError::Internal("ldap://10.0.0.5 refused".into()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = body_json(response).await;
        assert!(!body.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn test_access_denied_is_authentication_required() {
        let response = GateError::AccessDenied.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::rejected("account disabled");
        assert_eq!(err.to_string(), "identity rejected: account disabled");
    }
}
