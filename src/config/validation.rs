//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference known actions)
//! - Validate value ranges (windows > 0, thresholds > 0)
//! - Validate URLs and origin patterns before they reach the hot path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - A missing upstream URL is not an error here; it fails the request at dispatch

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, WindowLimit};
use crate::routing::matcher::Action;
use crate::security::headers::OriginPattern;
use crate::security::sanitize::Sanitizer;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }

    validate_auth(config, &mut errors);

    if config.security.max_body_bytes == 0 {
        errors.push(ValidationError::new("security.max_body_bytes", "must be greater than 0"));
    }

    // A placeholder the sanitizer would strip again never reaches a fixed point.
    if !Sanitizer::from_config(&config.security).is_inert(&config.security.placeholder) {
        errors.push(ValidationError::new(
            "security.placeholder",
            "must not match a dangerous content pattern",
        ));
    }

    for (field, limit) in [
        ("rate_limit.ip", config.rate_limit.ip),
        ("rate_limit.api_key", config.rate_limit.api_key),
        ("rate_limit.global", config.rate_limit.global),
    ] {
        validate_window(field, limit, &mut errors);
    }

    validate_flood(config, &mut errors);

    for (i, route) in config.routes.iter().enumerate() {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("routes[{i}].path_prefix"),
                "must start with '/'",
            ));
        }
        if Action::parse(&route.action).is_none() {
            errors.push(ValidationError::new(
                format!("routes[{i}].action"),
                format!("unknown action '{}'", route.action),
            ));
        }
    }

    for (field, url) in [
        ("upstreams.analyze_url", &config.upstreams.analyze_url),
        ("upstreams.translate_url", &config.upstreams.translate_url),
        ("audit.alert_webhook_url", &config.audit.alert_webhook_url),
    ] {
        if let Some(url) = url {
            validate_http_url(field, url, &mut errors);
        }
    }

    for (i, origin) in config.cors.allowed_origins.iter().enumerate() {
        if OriginPattern::compile(origin).is_err() {
            errors.push(ValidationError::new(
                format!("cors.allowed_origins[{i}]"),
                format!("invalid origin pattern '{origin}'"),
            ));
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.upstream_secs == 0 || timeouts.store_ms == 0 {
        errors.push(ValidationError::new("timeouts", "upstream and store timeouts must be greater than 0"));
    }

    // Flood get + put, the limiter, then the upstream call must all finish
    // before the outer timeout answers 408 in place of the pipeline's error.
    let pipeline_ms = timeouts
        .upstream_secs
        .saturating_mul(1000)
        .saturating_add(timeouts.store_ms.saturating_mul(4));
    if timeouts.request_secs.saturating_mul(1000) <= pipeline_ms {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            format!("must exceed upstream_secs plus four store calls ({pipeline_ms} ms)"),
        ));
    }

    if config.admin.enabled && config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        errors.push(ValidationError::new("admin.api_key", "placeholder key must be changed when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_auth(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    if config.auth.replay_window_secs == 0 {
        errors.push(ValidationError::new("auth.replay_window_secs", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, key) in config.auth.api_keys.iter().enumerate() {
        if key.key.trim().is_empty() {
            errors.push(ValidationError::new(format!("auth.api_keys[{i}].key"), "must not be empty"));
        } else if !seen.insert(key.key.as_str()) {
            errors.push(ValidationError::new(
                format!("auth.api_keys[{i}].key"),
                format!("duplicate key for '{}'", key.name),
            ));
        }
        if key.permissions.is_empty() {
            errors.push(ValidationError::new(
                format!("auth.api_keys[{i}].permissions"),
                "must grant at least one action",
            ));
        }
        if key.rate_limit == Some(0) {
            errors.push(ValidationError::new(
                format!("auth.api_keys[{i}].rate_limit"),
                "must be greater than 0",
            ));
        }
    }

    if !config.auth.api_keys.is_empty() && config.auth.hmac_secret.is_empty() {
        errors.push(ValidationError::new(
            "auth.hmac_secret",
            "must be set (or BAVEL_HMAC_SECRET) when API keys are configured",
        ));
    }
}

fn validate_window(field: &str, limit: WindowLimit, errors: &mut Vec<ValidationError>) {
    if limit.max_requests == 0 {
        errors.push(ValidationError::new(format!("{field}.max_requests"), "must be greater than 0"));
    }
    if limit.window_secs == 0 {
        errors.push(ValidationError::new(format!("{field}.window_secs"), "must be greater than 0"));
    }
}

fn validate_flood(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let flood = &config.flood;
    if flood.window_secs == 0 || flood.burst_window_secs == 0 {
        errors.push(ValidationError::new("flood", "windows must be greater than 0"));
    }
    if flood.burst_window_secs > flood.window_secs {
        errors.push(ValidationError::new("flood.burst_window_secs", "must not exceed window_secs"));
    }
    if flood.max_samples == 0 {
        errors.push(ValidationError::new("flood.max_samples", "must be greater than 0"));
    }
    if !(flood.requests_per_second > 0.0) {
        errors.push(ValidationError::new("flood.requests_per_second", "must be greater than 0"));
    }

    // The retained sample cap bounds the observable rate.
    let max_observable = flood.max_samples as f64 / flood.window_secs.max(1) as f64;
    if flood.enabled && flood.requests_per_second >= max_observable {
        tracing::warn!(
            requests_per_second = flood.requests_per_second,
            max_observable,
            "Flood rate threshold is unreachable with the configured sample cap; only bursts will trigger"
        );
    }
}

fn validate_http_url(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ApiKeyConfig, RouteConfig};

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.hmac_secret = "secret".to_string();
        config.auth.api_keys.push(ApiKeyConfig {
            key: "bavel_dev_key".to_string(),
            name: "Dev".to_string(),
            rate_limit: Some(50),
            permissions: vec!["analyze".to_string()],
        });
        config.upstreams.analyze_url = Some("https://n8n.example/webhook/analyze".to_string());
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.auth.hmac_secret.clear();
        config.auth.api_keys.push(config.auth.api_keys[0].clone());
        config.rate_limit.ip.window_secs = 0;
        config.upstreams.translate_url = Some("ftp://files.example".to_string());
        config.routes.push(RouteConfig {
            path_prefix: "summarize".to_string(),
            action: "summarize".to_string(),
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"auth.hmac_secret"));
        assert!(fields.contains(&"auth.api_keys[1].key"));
        assert!(fields.contains(&"rate_limit.ip.window_secs"));
        assert!(fields.contains(&"upstreams.translate_url"));
        assert!(fields.contains(&"routes[0].path_prefix"));
        assert!(fields.contains(&"routes[0].action"));
    }

    #[test]
    fn test_request_timeout_covers_pipeline() {
        let mut config = valid_config();
        config.timeouts.request_secs = 35;
        config.timeouts.upstream_secs = 30;
        config.timeouts.store_ms = 2000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "timeouts.request_secs");

        config.timeouts.request_secs = 39;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_dangerous_sanitizer_placeholder_rejected() {
        for placeholder in ["onclick=", "javascript:", "<embed src=x>"] {
            let mut config = valid_config();
            config.security.placeholder = placeholder.to_string();
            let errors = validate_config(&config).unwrap_err();
            assert_eq!(errors.len(), 1, "{placeholder}");
            assert_eq!(errors[0].field, "security.placeholder");
        }

        let mut config = valid_config();
        config.security.placeholder = "[filtered]".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_admin_placeholder_rejected_when_enabled() {
        let mut config = valid_config();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }
}
