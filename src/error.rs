//! Pipeline rejections.
//!
//! Every way a request can end without a forwarded upstream response is a
//! `GatewayError`. The variant decides the status code, the message the
//! caller sees, and the audit event recorded for it.

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::observability::audit::{EventType, Severity};
use crate::security::auth::AuthError;
use crate::security::flood::FloodReport;
use crate::security::rate_limit::RateVerdict;
use crate::security::sanitize::SanitizeError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Method not allowed")]
    MethodNotAllowed { method: String },

    #[error("Request too large")]
    PayloadTooLarge { declared: Option<u64>, limit: usize },

    #[error("Too many requests detected")]
    Flood { report: FloodReport, retry_after: u64 },

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded")]
    RateLimited { verdict: RateVerdict, retry_after: u64 },

    #[error("Invalid JSON")]
    InvalidJson(String),

    #[error("Invalid request data")]
    InvalidPayload(#[from] SanitizeError),

    #[error("Insufficient permissions")]
    InsufficientPermissions { action: String, permissions: Vec<String> },

    /// Transport failure, timeout, or a non-JSON upstream body.
    #[error("Internal server error")]
    Upstream(String),

    #[error("Internal server error")]
    Configuration(String),

    #[error("Internal server error")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Flood { .. } | GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidJson(_) | GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            GatewayError::Upstream(_) | GatewayError::Configuration(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message returned to the caller. Never includes internal detail.
    pub fn public_message(&self) -> String {
        self.to_string()
    }

    /// Seconds the caller should wait, for 429 responses.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::Flood { retry_after, .. } | GatewayError::RateLimited { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            GatewayError::MethodNotAllowed { .. } => EventType::InvalidMethod,
            GatewayError::PayloadTooLarge { .. } => EventType::RequestTooLarge,
            GatewayError::Flood { .. } => EventType::FloodDetected,
            GatewayError::Auth(e) if e.is_key_failure() => EventType::InvalidApiKey,
            GatewayError::Auth(_) => EventType::InvalidSignature,
            GatewayError::RateLimited { .. } => EventType::RateLimitExceeded,
            GatewayError::InvalidJson(_) => EventType::InvalidJson,
            GatewayError::InvalidPayload(_) => EventType::InvalidPayload,
            GatewayError::InsufficientPermissions { .. } => EventType::InsufficientPermissions,
            GatewayError::Upstream(_) => EventType::UpstreamError,
            GatewayError::Configuration(_) => EventType::ConfigurationError,
            GatewayError::Internal(_) => EventType::InternalError,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            GatewayError::MethodNotAllowed { .. } | GatewayError::InvalidJson(_) => Severity::Low,
            GatewayError::PayloadTooLarge { .. }
            | GatewayError::RateLimited { .. }
            | GatewayError::InvalidPayload(_)
            | GatewayError::InsufficientPermissions { .. }
            | GatewayError::Upstream(_) => Severity::Medium,
            GatewayError::Flood { .. }
            | GatewayError::Auth(_)
            | GatewayError::Configuration(_)
            | GatewayError::Internal(_) => Severity::High,
        }
    }

    /// Whether the gateway refused the request, as opposed to failing it.
    pub fn is_blocked(&self) -> bool {
        !matches!(
            self,
            GatewayError::Upstream(_) | GatewayError::Configuration(_) | GatewayError::Internal(_)
        )
    }

    /// Metric label for the rejection.
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::MethodNotAllowed { .. } => "method",
            GatewayError::PayloadTooLarge { .. } => "size",
            GatewayError::Flood { .. } => "flood",
            GatewayError::Auth(e) => e.reason(),
            GatewayError::RateLimited { .. } => "rate_limit",
            GatewayError::InvalidJson(_) => "invalid_json",
            GatewayError::InvalidPayload(_) => "invalid_payload",
            GatewayError::InsufficientPermissions { .. } => "permissions",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Audit `details` payload.
    pub fn details(&self) -> Value {
        match self {
            GatewayError::MethodNotAllowed { method } => json!({ "method": method }),
            GatewayError::PayloadTooLarge { declared, limit } => {
                json!({ "contentLength": declared, "limit": limit })
            }
            GatewayError::Flood { report, .. } => serde_json::to_value(report).unwrap_or(Value::Null),
            GatewayError::Auth(e) => json!({ "error": e.to_string(), "reason": e.reason() }),
            GatewayError::RateLimited { verdict, retry_after } => json!({
                "ipLimit": verdict.ip,
                "keyLimit": verdict.api_key,
                "globalLimit": verdict.global,
                "retryAfter": retry_after,
            }),
            GatewayError::InsufficientPermissions { action, permissions } => {
                json!({ "action": action, "permissions": permissions })
            }
            GatewayError::InvalidJson(detail)
            | GatewayError::Upstream(detail)
            | GatewayError::Configuration(detail)
            | GatewayError::Internal(detail) => json!({ "error": detail }),
            GatewayError::InvalidPayload(e) => json!({ "error": e.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_event_types() {
        let missing = GatewayError::Auth(AuthError::MissingApiKey);
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(missing.event_type(), EventType::InvalidApiKey);
        assert_eq!(missing.public_message(), "Missing API key");

        let sig = GatewayError::Auth(AuthError::TimestampExpired);
        assert_eq!(sig.event_type(), EventType::InvalidSignature);
        assert_eq!(sig.severity(), Severity::High);
        assert_eq!(sig.public_message(), "Request timestamp expired");
    }

    #[test]
    fn test_internal_failures_do_not_leak() {
        let err = GatewayError::Upstream("connection refused to 10.0.0.7:5678".into());
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.severity(), Severity::Medium);
        assert!(!err.is_blocked());

        let err = GatewayError::Configuration("no upstream for translate".into());
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.severity(), Severity::High);
    }

    #[test]
    fn test_permission_details() {
        let err = GatewayError::InsufficientPermissions {
            action: "translate".into(),
            permissions: vec!["analyze".into()],
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.details()["action"], "translate");
        assert_eq!(err.retry_after(), None);
    }
}
