//! Security and CORS response headers.
//!
//! # Responsibilities
//! - Add the fixed set of hardening headers to every response
//! - Compute CORS headers from the origin allow-list
//!
//! # Design Decisions
//! - Headers are applied to finished responses, success or failure
//! - `*` in an allowed origin matches one non-empty segment without `/`,
//!   and patterns are anchored at both ends
//! - A disallowed or missing origin gets no CORS headers at all

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

use crate::config::schema::CorsConfig;

/// Hardening headers set on every gateway response.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none';"),
    ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
    ("cache-control", "no-store, no-cache, must-revalidate, private"),
    ("pragma", "no-cache"),
    ("x-robots-tag", "noindex, nofollow"),
];

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, X-Bavel-API-Key, X-Bavel-Signature, X-Bavel-Timestamp, User-Agent";

/// Overwrite the hardening headers on a response.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

/// One entry of the origin allow-list.
#[derive(Debug, Clone)]
pub struct OriginPattern {
    raw: String,
    regex: Regex,
}

impl OriginPattern {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^/]+");
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&format!("^{body}$"))?,
        })
    }

    pub fn matches(&self, origin: &str) -> bool {
        self.regex.is_match(origin)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Compiled CORS policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    patterns: Vec<OriginPattern>,
    max_age: HeaderValue,
}

impl CorsPolicy {
    /// Patterns that fail to compile are skipped; validation reports them.
    pub fn from_config(config: &CorsConfig) -> Self {
        let patterns = config
            .allowed_origins
            .iter()
            .filter_map(|p| match OriginPattern::compile(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "Skipping invalid origin pattern");
                    None
                }
            })
            .collect();

        Self {
            patterns,
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(origin))
    }

    /// Add CORS headers when `origin` is on the allow-list.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        let Some(origin) = origin.filter(|o| self.is_allowed(o)) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(origin) else {
            return;
        };

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_origin_patterns() {
        let p = OriginPattern::compile("chrome-extension://*").unwrap();
        assert!(p.matches("chrome-extension://abcdefghijklmnop"));
        assert!(!p.matches("chrome-extension://"));
        assert!(!p.matches("chrome-extension://abc/evil"));
        assert!(!p.matches("https://evil.com/chrome-extension://abc"));

        // Literal characters are escaped
        let p = OriginPattern::compile("https://app.bavel.io").unwrap();
        assert!(p.matches("https://app.bavel.io"));
        assert!(!p.matches("https://appxbavel.io"));
    }

    #[test]
    fn test_cors_applied_only_for_allowed_origin() {
        let policy = CorsPolicy::from_config(&CorsConfig::default());

        let mut headers = HeaderMap::new();
        policy.apply(&mut headers, Some("moz-extension://1234-5678"));
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "moz-extension://1234-5678");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "3600");
        assert_eq!(headers[header::VARY], "Origin");

        let mut headers = HeaderMap::new();
        policy.apply(&mut headers, Some("https://evil.example"));
        assert!(headers.is_empty());

        policy.apply(&mut headers, None);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_security_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
        apply_security_headers(&mut headers);

        assert_eq!(headers.len(), SECURITY_HEADERS.len());
        assert_eq!(headers[header::CACHE_CONTROL], "no-store, no-cache, must-revalidate, private");
        assert_eq!(headers["x-frame-options"], "DENY");
    }
}
