//! Security event audit trail.
//!
//! # Responsibilities
//! - Define the severity-tagged `SecurityEvent` record
//! - Write every event to the `security_event` tracing target
//! - Persist HIGH events in the store and send a one-shot webhook alert
//!
//! # Design Decisions
//! - API keys are masked when the event is built, so the raw key never
//!   reaches a log line, the store or the webhook
//! - Persistence and alert failures are logged and swallowed
//! - Callers run `log` on a detached task after the response is ready

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::schema::AuditConfig;
use crate::observability::metrics;
use crate::store::KvStore;

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Kinds of security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InvalidMethod,
    RequestTooLarge,
    FloodDetected,
    InvalidApiKey,
    RateLimitExceeded,
    InvalidJson,
    InvalidSignature,
    InvalidPayload,
    InsufficientPermissions,
    UpstreamError,
    ConfigurationError,
    RequestSuccess,
    InternalError,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    pub user_agent: String,
    pub api_key: Option<String>,
    pub details: Value,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub store_degraded: bool,
}

impl SecurityEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        client_ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type,
            severity,
            client_ip: client_ip.into(),
            user_agent: user_agent.into(),
            api_key: None,
            details: json!({}),
            blocked: false,
            request_id: None,
            store_degraded: false,
        }
    }

    /// Attach the caller's API key, masked to its first `prefix_len` characters.
    pub fn with_api_key(mut self, key: Option<&str>, prefix_len: usize) -> Self {
        self.api_key = key.filter(|k| !k.is_empty()).map(|k| mask_api_key(k, prefix_len));
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Flag that a store-backed check failed open for this request.
    pub fn mark_store_degraded(&mut self) {
        self.store_degraded = true;
        self.severity = self.severity.max(Severity::Medium);
    }
}

/// First `prefix_len` characters followed by `***`.
pub fn mask_api_key(key: &str, prefix_len: usize) -> String {
    let prefix: String = key.chars().take(prefix_len).collect();
    format!("{prefix}***")
}

/// Writes audit events and raises alerts.
pub struct SecurityLogger {
    store: Arc<dyn KvStore>,
    client: reqwest::Client,
    config: AuditConfig,
    alert_timeout: Duration,
}

impl SecurityLogger {
    pub fn new(
        store: Arc<dyn KvStore>,
        client: reqwest::Client,
        config: AuditConfig,
        alert_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            config,
            alert_timeout,
        }
    }

    pub fn api_key_prefix_len(&self) -> usize {
        self.config.api_key_prefix_len
    }

    /// Record an event. HIGH events are also persisted and alerted on.
    pub async fn log(&self, event: &SecurityEvent) {
        emit(event);

        if event.severity != Severity::High {
            return;
        }

        match self.persist(event).await {
            Ok(key) => tracing::debug!(key = %key, "Persisted security event"),
            Err(e) => tracing::error!(error = %e, "Failed to persist security event"),
        }

        if let Some(url) = self.config.alert_webhook_url.as_deref() {
            self.send_alert(url, event).await;
        }
    }

    async fn persist(&self, event: &SecurityEvent) -> Result<String, crate::store::StoreError> {
        let key = format!(
            "security_event:{}:{}",
            crate::security::unix_now_millis(),
            fastrand::u64(..)
        );
        let value = serde_json::to_string(event).map_err(|e| crate::store::StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store
            .put(&key, &value, Duration::from_secs(self.config.retention_secs))
            .await?;
        Ok(key)
    }

    async fn send_alert(&self, url: &str, event: &SecurityEvent) {
        let payload = json!({
            "alert": "High severity security event detected",
            "service": self.config.service_name,
            "details": event,
        });

        let result = self
            .client
            .post(url)
            .timeout(self.alert_timeout)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => metrics::record_alert("sent"),
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Alert webhook rejected security alert");
                metrics::record_alert("rejected");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send security alert");
                metrics::record_alert("failed");
            }
        }
    }
}

fn emit(event: &SecurityEvent) {
    let record = serde_json::to_string(event).unwrap_or_default();
    let event_type = serde_json::to_value(event.event_type).unwrap_or(Value::Null);
    let event_type = event_type.as_str().unwrap_or("UNKNOWN");

    match event.severity {
        Severity::High => tracing::warn!(
            target: "security_event",
            event_type,
            severity = "HIGH",
            client_ip = %event.client_ip,
            blocked = event.blocked,
            record = %record,
            "SECURITY_EVENT"
        ),
        Severity::Medium => tracing::info!(
            target: "security_event",
            event_type,
            severity = "MEDIUM",
            client_ip = %event.client_ip,
            blocked = event.blocked,
            record = %record,
            "SECURITY_EVENT"
        ),
        Severity::Low => tracing::info!(
            target: "security_event",
            event_type,
            severity = "LOW",
            client_ip = %event.client_ip,
            blocked = event.blocked,
            record = %record,
            "SECURITY_EVENT"
        ),
    }
}
