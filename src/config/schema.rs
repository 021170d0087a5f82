//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, client IP header).
    pub listener: ListenerConfig,

    /// API keys and request signing.
    pub auth: AuthConfig,

    /// Request size limits and payload sanitization.
    pub security: SecurityConfig,

    /// Fixed-window rate limiting per scope.
    pub rate_limit: RateLimitConfig,

    /// Per-IP flood detection thresholds.
    pub flood: FloodConfig,

    /// Path-to-action routes, checked in order.
    pub routes: Vec<RouteConfig>,

    /// Upstream URLs per action.
    pub upstreams: UpstreamConfig,

    /// CORS origin allow-list.
    pub cors: CorsConfig,

    /// Counter store backend.
    pub store: StoreConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Security event persistence and alerting.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Header set by the trusted edge carrying the real client IP.
    pub client_ip_header: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            client_ip_header: "cf-connecting-ip".to_string(),
        }
    }
}

/// API key registry and HMAC settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for request signatures. Overridden by `BAVEL_HMAC_SECRET`.
    pub hmac_secret: String,

    /// Maximum allowed clock skew between client and gateway, in seconds.
    pub replay_window_secs: u64,

    /// Registered API keys.
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hmac_secret: String::new(),
            replay_window_secs: 300,
            api_keys: Vec::new(),
        }
    }
}

/// A single API key entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    /// The raw key, as sent in `X-Bavel-API-Key`.
    pub key: String,

    /// Human readable client name.
    pub name: String,

    /// Requests per window for this key. Falls back to the apiKey scope limit.
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Actions this key may invoke (e.g., "analyze", "translate").
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Request size limits and sanitizer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_bytes: usize,

    /// Replacement for stripped markup.
    pub placeholder: String,

    /// Maximum characters for top-level string fields.
    pub field_limits: BTreeMap<String, usize>,

    /// Maximum characters for `pageContext` string fields.
    pub page_context_limits: BTreeMap<String, usize>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let field_limits = [("selectedText", 5000), ("userLanguage", 10), ("action", 20)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let page_context_limits = [
            ("title", 200),
            ("url", 2048),
            ("mainContent", 10_000),
            ("description", 500),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            max_body_bytes: 50_000,
            placeholder: "[removed]".to_string(),
            field_limits,
            page_context_limits,
        }
    }
}

/// Limit for one rate-limit scope.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct WindowLimit {
    /// Requests admitted per window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Per client IP.
    pub ip: WindowLimit,

    /// Per API key.
    pub api_key: WindowLimit,

    /// Across all callers.
    pub global: WindowLimit,

    /// `remaining` reported when the store is unavailable and the limiter fails open.
    pub fail_open_remaining: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip: WindowLimit { max_requests: 50, window_secs: 900 },
            api_key: WindowLimit { max_requests: 100, window_secs: 900 },
            global: WindowLimit { max_requests: 1000, window_secs: 900 },
            fail_open_remaining: 999,
        }
    }
}

/// Flood detection thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Enable flood detection.
    pub enabled: bool,

    /// Sustained rate over the window that flags a flood.
    pub requests_per_second: f64,

    /// Requests inside the burst window that flag a flood.
    pub burst_requests: u32,

    /// Trailing window kept per IP, in seconds.
    pub window_secs: u64,

    /// Burst window, in seconds.
    pub burst_window_secs: u64,

    /// Samples retained per IP.
    pub max_samples: usize,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst_requests: 10,
            window_secs: 60,
            burst_window_secs: 5,
            max_samples: 100,
        }
    }
}

/// Route mapping a path prefix to an action.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match (e.g., "/translate").
    pub path_prefix: String,

    /// Action name ("analyze" or "translate").
    pub action: String,
}

/// Upstream endpoints per action.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Analysis webhook. Overridden by `BAVEL_ANALYZE_URL`.
    pub analyze_url: Option<String>,

    /// Translation webhook. Overridden by `BAVEL_TRANSLATE_URL`.
    pub translate_url: Option<String>,

    /// `User-Agent` sent upstream.
    pub user_agent: String,

    /// `X-Extension-Version` forwarded when the client sends none.
    pub default_extension_version: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            analyze_url: None,
            translate_url: None,
            user_agent: concat!("Bavel-Security-Proxy/", env!("CARGO_PKG_VERSION")).to_string(),
            default_extension_version: "1.0.0".to_string(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` matches one path-free segment.
    pub allowed_origins: Vec<String>,

    /// `Access-Control-Max-Age` in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "chrome-extension://*".to_string(),
                "moz-extension://*".to_string(),
            ],
            max_age_secs: 3600,
        }
    }
}

/// Counter store backend selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend holds counters and events.
    pub backend: StoreBackend,

    /// Redis connection URL. Overridden by `BAVEL_REDIS_URL`.
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a request/response through the gateway, in seconds.
    /// Must cover the upstream timeout plus four store calls.
    pub request_secs: u64,

    /// Upstream dispatch, in seconds.
    pub upstream_secs: u64,

    /// Each counter store operation, in milliseconds.
    pub store_ms: u64,

    /// Alert webhook delivery, in seconds.
    pub alert_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 40,
            upstream_secs: 30,
            store_ms: 2000,
            alert_secs: 5,
        }
    }
}

/// Security event audit settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Webhook receiving HIGH severity alerts. Overridden by `BAVEL_ALERT_WEBHOOK_URL`.
    pub alert_webhook_url: Option<String>,

    /// Retention for persisted HIGH events, in seconds.
    pub retention_secs: u64,

    /// Characters of the API key kept when masking.
    pub api_key_prefix_len: usize,

    /// Service name reported in alerts.
    pub service_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            alert_webhook_url: None,
            retention_secs: 86_400 * 30,
            api_key_prefix_len: 12,
            service_name: "Bavel Security Proxy".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Bearer token. Overridden by `BAVEL_ADMIN_API_KEY`.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Routes to use when none are configured.
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if !self.routes.is_empty() {
            return self.routes.clone();
        }
        vec![
            RouteConfig { path_prefix: "/translate".to_string(), action: "translate".to_string() },
            RouteConfig { path_prefix: "/analyze".to_string(), action: "analyze".to_string() },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [auth]
            hmac_secret = "s3cret"

            [[auth.api_keys]]
            key = "k1"
            name = "Extension"
            permissions = ["analyze"]
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.replay_window_secs, 300);
        assert_eq!(config.auth.api_keys[0].rate_limit, None);
        assert_eq!(config.security.max_body_bytes, 50_000);
        assert_eq!(config.security.field_limits["selectedText"], 5000);
        assert_eq!(config.rate_limit.ip.max_requests, 50);
        assert_eq!(config.flood.burst_requests, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.effective_routes().len(), 2);
    }

    #[test]
    fn test_store_backend_parses_lowercase() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [store]
            backend = "redis"
            redis_url = "redis://cache:6379"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379");
    }
}
