//! Request context extraction.
//!
//! # Responsibilities
//! - Resolve the client IP from the trusted edge header or the peer address
//! - Collect the headers the pipeline and the audit trail need
//!
//! # Design Decisions
//! - Request ID is assigned by the `SetRequestIdLayer` before the handler runs
//! - Header values that are not valid UTF-8 are treated as absent

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap, Method};

use crate::security::auth::{API_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::security::limits::declared_length;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const EXTENSION_VERSION_HEADER: &str = "x-extension-version";

/// Client IP used when neither the edge header nor the peer address is known.
pub const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

/// Everything the pipeline reads from the request head.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// Declared `Content-Length`, 0 when absent.
    pub content_length: u64,
    pub client_ip: String,
    pub user_agent: String,
    pub origin: Option<String>,
    pub api_key: Option<String>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub extension_version: Option<String>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts, client_ip_header: &str) -> Self {
        let headers = &parts.headers;
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            request_id: header_str(headers, X_REQUEST_ID).unwrap_or_else(|| "unknown".to_string()),
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            content_length: declared_length(headers),
            client_ip: client_ip(headers, client_ip_header, peer),
            user_agent: header_str(headers, header::USER_AGENT.as_str()).unwrap_or_else(|| "Unknown".to_string()),
            origin: header_str(headers, header::ORIGIN.as_str()),
            api_key: header_str(headers, API_KEY_HEADER),
            signature: header_str(headers, SIGNATURE_HEADER),
            timestamp: header_str(headers, TIMESTAMP_HEADER),
            extension_version: header_str(headers, EXTENSION_VERSION_HEADER),
        }
    }
}

/// Edge header first, then the TCP peer, then `0.0.0.0`.
pub fn client_ip(headers: &HeaderMap, edge_header: &str, peer: Option<SocketAddr>) -> String {
    header_str(headers, edge_header)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.10:55000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, "cf-connecting-ip", None), "0.0.0.0");
        assert_eq!(client_ip(&headers, "cf-connecting-ip", Some(peer)), "192.0.2.10");

        headers.insert("cf-connecting-ip", "203.0.113.5".parse().unwrap());
        assert_eq!(client_ip(&headers, "cf-connecting-ip", Some(peer)), "203.0.113.5");
    }

    #[test]
    fn test_context_from_parts() {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/translate?x=1")
            .header(X_REQUEST_ID, "req-1")
            .header("x-bavel-api-key", "key")
            .header("x-bavel-timestamp", "1700000000")
            .header("origin", "chrome-extension://abc")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("198.51.100.1:4000".parse::<SocketAddr>().unwrap()));
        let (parts, _) = request.into_parts();

        let ctx = RequestContext::from_parts(&parts, "cf-connecting-ip");
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.path, "/translate");
        assert_eq!(ctx.client_ip, "198.51.100.1");
        assert_eq!(ctx.user_agent, "Unknown");
        assert_eq!(ctx.api_key.as_deref(), Some("key"));
        assert_eq!(ctx.signature, None);
        assert_eq!(ctx.content_length, 0);
        assert_eq!(ctx.origin.as_deref(), Some("chrome-extension://abc"));
    }
}
