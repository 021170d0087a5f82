//! Response construction and decoration.
//!
//! # Responsibilities
//! - Map `GatewayError` to a JSON `{success, error}` body
//! - Add rate-limit and `Retry-After` headers
//! - Apply security and CORS headers to every response
//!
//! # Design Decisions
//! - Upstream bodies are passed through verbatim with the upstream status
//! - Gateway-generated bodies always carry `success`

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::security::headers::{apply_security_headers, CorsPolicy};

pub const RATE_LIMIT_REMAINING_IP: &str = "x-rate-limit-remaining-ip";
pub const RATE_LIMIT_REMAINING_KEY: &str = "x-rate-limit-remaining-key";

/// JSON body for a rejection.
pub fn error_body(err: &GatewayError) -> Value {
    let mut body = json!({
        "success": false,
        "error": err.public_message(),
    });
    if let Some(retry_after) = err.retry_after() {
        body["retryAfter"] = json!(retry_after);
    }
    body
}

/// Response for a rejection.
pub fn error_response(err: &GatewayError) -> Response {
    let mut response = (err.status(), Json(error_body(err))).into_response();
    if let Some(retry_after) = err.retry_after() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
    response
}

/// Upstream body and status with the caller's remaining quota.
pub fn forwarded_response(status: StatusCode, body: &Value, ip_remaining: u32, key_remaining: u32) -> Response {
    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_REMAINING_IP, HeaderValue::from(ip_remaining));
    headers.insert(RATE_LIMIT_REMAINING_KEY, HeaderValue::from(key_remaining));
    response
}

/// Empty 204 for CORS pre-flight.
pub fn preflight_response() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// Add security headers and, for allowed origins, CORS headers.
pub fn decorate(mut response: Response, cors: &CorsPolicy, origin: Option<&str>) -> Response {
    let headers = response.headers_mut();
    apply_security_headers(headers);
    cors.apply(headers, origin);
    response
}
