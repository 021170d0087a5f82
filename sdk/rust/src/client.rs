use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;

use crate::backoff::calculate_backoff;

pub const API_KEY_HEADER: &str = "X-Bavel-API-Key";
pub const SIGNATURE_HEADER: &str = "X-Bavel-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Bavel-Timestamp";
pub const EXTENSION_VERSION_HEADER: &str = "X-Extension-Version";
pub const RATE_LIMIT_REMAINING_IP: &str = "X-Rate-Limit-Remaining-IP";
pub const RATE_LIMIT_REMAINING_KEY: &str = "X-Rate-Limit-Remaining-Key";

const DEFAULT_EXTENSION_VERSION: &str = "1.0.0";
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Rate limit exceeded, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("Authentication failed, check the API key")]
    Unauthorized,

    #[error("Insufficient permissions for this action")]
    Forbidden,

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid signing secret")]
    InvalidSecret,
}

impl SdkError {
    /// Credential and permission failures are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SdkError::Unauthorized | SdkError::Forbidden | SdkError::InvalidSecret
        )
    }
}

/// Successful gateway reply plus the remaining quota it reported.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub remaining_ip: Option<u32>,
    pub remaining_key: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub selected_text: String,
    pub user_language: String,
    pub page_context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub selected_text: String,
    pub user_language: String,
    pub source_language: Option<String>,
    pub context: Option<String>,
}

/// Headers and body of one signed call.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub timestamp: String,
    pub signature: String,
    pub body: String,
}

pub struct SecureClient {
    client: Client,
    base_url: String,
    api_key: String,
    hmac_secret: String,
    extension_version: String,
    retry_base_ms: u64,
    retry_max_ms: u64,
}

impl SecureClient {
    pub fn new(base_url: &str, api_key: &str, hmac_secret: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            hmac_secret: hmac_secret.to_string(),
            extension_version: DEFAULT_EXTENSION_VERSION.to_string(),
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
        }
    }

    pub fn with_extension_version(mut self, version: &str) -> Self {
        self.extension_version = version.to_string();
        self
    }

    pub fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_ms = base_ms;
        self.retry_max_ms = max_ms;
        self
    }

    /// Lower-case hex HMAC-SHA256 of `timestamp + body`.
    pub fn sign(&self, timestamp: &str, body: &str) -> Result<String, SdkError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.hmac_secret.as_bytes())
            .map_err(|_| SdkError::InvalidSecret)?;
        mac.update(timestamp.as_bytes());
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Serialize `payload` once and sign exactly those bytes.
    pub fn sign_payload(&self, payload: &Value) -> Result<SignedRequest, SdkError> {
        let timestamp = unix_now().to_string();
        let body = serde_json::to_string(payload)?;
        let signature = self.sign(&timestamp, &body)?;
        Ok(SignedRequest {
            timestamp,
            signature,
            body,
        })
    }

    /// POST a signed payload to `endpoint` (e.g. `/analyze`).
    pub async fn send(&self, endpoint: &str, payload: &Value) -> Result<ApiResponse, SdkError> {
        let signed = self.sign_payload(payload)?;

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::USER_AGENT,
                format!("Bavel-Extension/{}", self.extension_version),
            )
            .header(EXTENSION_VERSION_HEADER, &self.extension_version)
            .header(API_KEY_HEADER, &self.api_key)
            .header(SIGNATURE_HEADER, &signed.signature)
            .header(TIMESTAMP_HEADER, &signed.timestamp)
            .body(signed.body)
            .send()
            .await?;

        let status = resp.status();
        let remaining_ip = header_u32(&resp, RATE_LIMIT_REMAINING_IP);
        let remaining_key = header_u32(&resp, RATE_LIMIT_REMAINING_KEY);
        let retry_after = header_u32(&resp, "Retry-After").map(u64::from);
        let text = resp.text().await?;

        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(SdkError::RateLimited { retry_after }),
            StatusCode::UNAUTHORIZED => Err(SdkError::Unauthorized),
            StatusCode::FORBIDDEN => Err(SdkError::Forbidden),
            s if !s.is_success() => Err(SdkError::Api {
                status: s.as_u16(),
                body: text,
            }),
            s => Ok(ApiResponse {
                status: s.as_u16(),
                body: serde_json::from_str(&text)?,
                remaining_ip,
                remaining_key,
            }),
        }
    }

    /// Retry `send` up to `max_retries` attempts in total.
    pub async fn send_with_retry(
        &self,
        endpoint: &str,
        payload: &Value,
        max_retries: u32,
    ) -> Result<ApiResponse, SdkError> {
        let attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.send(endpoint, payload).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }

            let delay = match &err {
                SdkError::RateLimited {
                    retry_after: Some(secs),
                } => Duration::from_secs(*secs).min(Duration::from_millis(self.retry_max_ms)),
                // Rate limited without a hint backs off one step further.
                SdkError::RateLimited { retry_after: None } => {
                    calculate_backoff(attempt + 1, self.retry_base_ms, self.retry_max_ms)
                }
                _ => calculate_backoff(attempt, self.retry_base_ms, self.retry_max_ms),
            };
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn analyze_text(&self, req: &AnalyzeRequest) -> Result<ApiResponse, SdkError> {
        let payload = json!({
            "action": "analyze",
            "selectedText": req.selected_text,
            "userLanguage": req.user_language,
            "pageContext": req.page_context.clone().unwrap_or_else(|| json!({})),
            "preferences": {
                "responseStyle": "helpful",
                "responseLength": "medium",
                "includeExamples": true,
                "tone": "constructive"
            }
        });
        self.send("/analyze", &payload).await
    }

    pub async fn translate_text(&self, req: &TranslateRequest) -> Result<ApiResponse, SdkError> {
        let payload = json!({
            "action": "translate",
            "selectedText": req.selected_text,
            "userLanguage": req.user_language,
            "sourceLanguage": req.source_language.as_deref().unwrap_or("auto"),
            "context": req.context.as_deref().unwrap_or("")
        });
        self.send("/translate", &payload).await
    }

    /// Minimal signed round trip through the gateway.
    pub async fn test_connection(&self) -> Result<ApiResponse, SdkError> {
        let payload = json!({
            "action": "analyze",
            "selectedText": "Hello world",
            "userLanguage": "pt"
        });
        self.send("/test", &payload).await
    }
}

fn header_u32(resp: &reqwest::Response, name: &str) -> Option<u32> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
