//! Request correlation.
//!
//! Every request gets an `X-Request-Id`, either the one the proxy sent or a
//! fresh UUID. The id is echoed on the response and stamped into JSON
//! authentication errors so a user's report can be matched to the SSO
//! diagnostics for that request. The request count and latency are recorded
//! here too, since this layer sees every response.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{HeaderValue, header::CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound id that is propagated. Anything longer is replaced.
const MAX_INBOUND_ID_LEN: usize = 128;

/// The id of the current request, available as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse an id supplied upstream, if it is short printable ASCII.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        if value.is_empty() || value.len() > MAX_INBOUND_ID_LEN {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(RequestId::from_header)
        .unwrap_or_default();

    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let method = req.method().to_string();
    let path = metric_path(&req);
    let start_time = Instant::now();

    let response = next.run(req).instrument(span).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64(),
    );

    let mut response = stamp_error_body(response, &request_id).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Route template used as the metrics `path` label. Requests that match no
/// route share one label so arbitrary URLs cannot grow the series count.
fn metric_path(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Add `error.request_id` to JSON error responses.
async fn stamp_error_body(response: Response, request_id: &RequestId) -> Response {
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read error response body");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let Ok(mut json) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    let Some(error) = json.get_mut("error").and_then(|e| e.as_object_mut()) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    error.insert(
        "request_id".to_string(),
        serde_json::Value::String(request_id.to_string()),
    );

    match serde_json::to_vec(&json) {
        Ok(stamped) => {
            // The body length changed.
            parts.headers.remove(axum::http::header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(stamped))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}
