//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Secrets and deployment URLs may come from the environment instead of the file.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(secret) = lookup("BAVEL_HMAC_SECRET") {
        config.auth.hmac_secret = secret;
    }
    if let Some(url) = lookup("BAVEL_ANALYZE_URL") {
        config.upstreams.analyze_url = Some(url);
    }
    if let Some(url) = lookup("BAVEL_TRANSLATE_URL") {
        config.upstreams.translate_url = Some(url);
    }
    if let Some(url) = lookup("BAVEL_ALERT_WEBHOOK_URL") {
        config.audit.alert_webhook_url = Some(url);
    }
    if let Some(url) = lookup("BAVEL_REDIS_URL") {
        config.store.redis_url = url;
    }
    if let Some(key) = lookup("BAVEL_ADMIN_API_KEY") {
        config.admin.api_key = key;
    }
}
