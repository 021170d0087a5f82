//! Request authentication: API key registry and HMAC request signatures.
//!
//! # Responsibilities
//! - Look up the caller's API key in the static registry
//! - Verify `HMAC-SHA256(secret, timestamp ‖ canonical JSON body)`
//! - Reject timestamps outside the replay window
//!
//! # Design Decisions
//! - Pure validation, no side effects; the pipeline audits failures
//! - Canonical JSON is the compact serialization with key order preserved,
//!   matching what the extension signs
//! - Signatures compare in constant time and only in lower-case hex
//! - Any cryptographic failure is a validation failure, never a pass

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::config::schema::ApiKeyConfig;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-bavel-api-key";
pub const SIGNATURE_HEADER: &str = "x-bavel-signature";
pub const TIMESTAMP_HEADER: &str = "x-bavel-timestamp";

/// Authentication failures. The display text is what the caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Missing signature or timestamp")]
    MissingSignature,

    #[error("Invalid request timestamp")]
    InvalidTimestamp,

    #[error("Request timestamp expired")]
    TimestampExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature validation failed")]
    SignatureFailure,
}

impl AuthError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingApiKey => "missing_api_key",
            AuthError::InvalidApiKey => "invalid_api_key",
            AuthError::MissingSignature => "missing_signature",
            AuthError::InvalidTimestamp => "invalid_timestamp",
            AuthError::TimestampExpired => "timestamp_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::SignatureFailure => "signature_failure",
        }
    }

    /// True for failures of the API key stage.
    pub fn is_key_failure(&self) -> bool {
        matches!(self, AuthError::MissingApiKey | AuthError::InvalidApiKey)
    }
}

/// A registered API key.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    #[serde(skip)]
    pub key: String,
    pub name: String,
    pub rate_limit: Option<u32>,
    pub permissions: HashSet<String>,
}

impl ApiKeyRecord {
    /// Whether this key may invoke the named action.
    pub fn permits(&self, action: &str) -> bool {
        self.permissions.contains(action)
    }
}

/// Immutable lookup table of API keys.
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    keys: HashMap<String, Arc<ApiKeyRecord>>,
}

impl ApiKeyRegistry {
    pub fn from_config(keys: &[ApiKeyConfig]) -> Self {
        let keys = keys
            .iter()
            .map(|k| {
                let record = ApiKeyRecord {
                    key: k.key.clone(),
                    name: k.name.clone(),
                    rate_limit: k.rate_limit,
                    permissions: k.permissions.iter().cloned().collect(),
                };
                (k.key.clone(), Arc::new(record))
            })
            .collect();
        Self { keys }
    }

    /// Validate the header-supplied key.
    pub fn validate(&self, supplied: Option<&str>) -> Result<Arc<ApiKeyRecord>, AuthError> {
        let key = supplied.ok_or(AuthError::MissingApiKey)?;
        if key.is_empty() {
            return Err(AuthError::MissingApiKey);
        }
        self.keys.get(key).cloned().ok_or(AuthError::InvalidApiKey)
    }

    /// All records, ordered by name.
    pub fn records(&self) -> Vec<Arc<ApiKeyRecord>> {
        let mut records: Vec<_> = self.keys.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The exact string that is signed: timestamp followed by the compact JSON body.
pub fn canonical_payload(timestamp: &str, body: &Value) -> Result<String, AuthError> {
    let json = serde_json::to_string(body).map_err(|_| AuthError::SignatureFailure)?;
    Ok(format!("{timestamp}{json}"))
}

/// Lower-case hex HMAC-SHA256 over the canonical payload.
pub fn compute_signature(secret: &[u8], timestamp: &str, body: &Value) -> Result<String, AuthError> {
    let mac = keyed_mac(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(secret: &[u8], timestamp: &str, body: &Value) -> Result<HmacSha256, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SignatureFailure);
    }
    let payload = canonical_payload(timestamp, body)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::SignatureFailure)?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Verifies request signatures against the shared secret.
pub struct SignatureVerifier {
    secret: Vec<u8>,
    replay_window_secs: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .field("replay_window_secs", &self.replay_window_secs)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, replay_window_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            replay_window_secs,
        }
    }

    /// Verify against the current server time.
    pub fn verify(&self, timestamp: Option<&str>, signature: Option<&str>, body: &Value) -> Result<(), AuthError> {
        self.verify_at(timestamp, signature, body, super::unix_now() as i64)
    }

    /// Verify against an explicit server time (unix seconds).
    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &Value,
        now: i64,
    ) -> Result<(), AuthError> {
        let (timestamp, signature) = match (timestamp, signature) {
            (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => (t, s),
            _ => return Err(AuthError::MissingSignature),
        };

        let request_time: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::InvalidTimestamp)?;
        if now.abs_diff(request_time) > self.replay_window_secs {
            return Err(AuthError::TimestampExpired);
        }

        // Only the exact lower-case hex form is accepted.
        if signature.len() != 64 || !signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(AuthError::InvalidSignature);
        }
        let supplied = hex::decode(signature).map_err(|_| AuthError::InvalidSignature)?;

        let mac = keyed_mac(&self.secret, timestamp, body)?;
        mac.verify_slice(&supplied).map_err(|_| AuthError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"1f6e1f800901c2f58c9712f29a312d73";
    const NOW: i64 = 1_700_000_000;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, 300)
    }

    fn body() -> Value {
        json!({ "selectedText": "Hello world", "userLanguage": "pt", "action": "analyze" })
    }

    #[test]
    fn test_canonical_payload_preserves_key_order() {
        let body: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":null}}"#).unwrap();
        assert_eq!(
            canonical_payload("1700000000", &body).unwrap(),
            r#"1700000000{"b":1,"a":{"z":true,"y":null}}"#
        );
    }

    #[test]
    fn test_valid_signature() {
        let ts = NOW.to_string();
        let sig = compute_signature(SECRET, &ts, &body()).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verifier().verify_at(Some(&ts), Some(&sig), &body(), NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let ts = NOW.to_string();
        let sig = compute_signature(SECRET, &ts, &body()).unwrap();

        let mut tampered = body();
        tampered["selectedText"] = json!("Hello world!");

        assert_eq!(
            verifier().verify_at(Some(&ts), Some(&sig), &tampered, NOW),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_timestamp_rejected_even_when_signed() {
        let old = (NOW - 301).to_string();
        let sig = compute_signature(SECRET, &old, &body()).unwrap();
        assert_eq!(
            verifier().verify_at(Some(&old), Some(&sig), &body(), NOW),
            Err(AuthError::TimestampExpired)
        );

        let future = (NOW + 301).to_string();
        let sig = compute_signature(SECRET, &future, &body()).unwrap();
        assert_eq!(
            verifier().verify_at(Some(&future), Some(&sig), &body(), NOW),
            Err(AuthError::TimestampExpired)
        );

        // Boundary is inclusive
        let edge = (NOW - 300).to_string();
        let sig = compute_signature(SECRET, &edge, &body()).unwrap();
        assert!(verifier().verify_at(Some(&edge), Some(&sig), &body(), NOW).is_ok());
    }

    #[test]
    fn test_uppercase_hex_rejected() {
        let ts = NOW.to_string();
        let sig = compute_signature(SECRET, &ts, &body()).unwrap().to_uppercase();
        assert_eq!(
            verifier().verify_at(Some(&ts), Some(&sig), &body(), NOW),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_missing_and_malformed_inputs() {
        let v = verifier();
        assert_eq!(v.verify_at(None, Some("ab"), &body(), NOW), Err(AuthError::MissingSignature));
        assert_eq!(v.verify_at(Some("1"), None, &body(), NOW), Err(AuthError::MissingSignature));
        assert_eq!(
            v.verify_at(Some("yesterday"), Some("ab"), &body(), NOW),
            Err(AuthError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_empty_secret_never_validates() {
        let ts = NOW.to_string();
        let sig = compute_signature(SECRET, &ts, &body()).unwrap();
        let v = SignatureVerifier::new(Vec::new(), 300);
        assert_eq!(v.verify_at(Some(&ts), Some(&sig), &body(), NOW), Err(AuthError::SignatureFailure));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ApiKeyRegistry::from_config(&[ApiKeyConfig {
            key: "bavel_dev_2024_x9y8z7w6v5u4".into(),
            name: "Bavel Extension Dev".into(),
            rate_limit: Some(50),
            permissions: vec!["analyze".into(), "translate".into()],
        }]);

        assert_eq!(registry.validate(None).unwrap_err(), AuthError::MissingApiKey);
        assert_eq!(registry.validate(Some("")).unwrap_err(), AuthError::MissingApiKey);
        assert_eq!(registry.validate(Some("bavel_dev_2024")).unwrap_err(), AuthError::InvalidApiKey);

        let record = registry.validate(Some("bavel_dev_2024_x9y8z7w6v5u4")).unwrap();
        assert_eq!(record.name, "Bavel Extension Dev");
        assert!(record.permits("translate"));
        assert!(!record.permits("summarize"));
    }
}
