//! Fixed-window rate limiting over the counter store.
//!
//! # Responsibilities
//! - Keep one counter per `(scope, identifier)` in the store
//! - Admit a request only when the ip, apiKey and global windows all allow it
//! - Fail open when the store cannot be read or written
//!
//! # Design Decisions
//! - Each scope is one `KvStore::increment_window` call. Redis runs it as a
//!   script, so check-and-count is atomic across instances. The in-memory
//!   store reads then writes; racers on one window may each read the same
//!   count and admit up to `max + racers - 1` requests
//! - A denied request never increments the counter of the denying scope
//! - The three scopes are counted concurrently and independently. A request
//!   denied by one scope still counts in the others, so a client stuck at its
//!   ip limit keeps spending the global window. Nothing is rolled back
//! - A window is over once `now >= resetTime`
//! - Counters expire from the store when their window ends

use std::sync::Arc;

use serde::Serialize;

use crate::config::schema::{RateLimitConfig, WindowLimit};
use crate::observability::metrics;
use crate::security::auth::ApiKeyRecord;
use crate::store::{KvStore, StoreError, WindowCount};

pub use crate::store::WindowState;

/// Counter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scope {
    #[serde(rename = "ip")]
    Ip,
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "global")]
    Global,
}

impl Scope {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ip" => Some(Scope::Ip),
            "apiKey" => Some(Scope::ApiKey),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::ApiKey => "apiKey",
            Scope::Global => "global",
        }
    }

    /// Store key holding the counter for `identifier`.
    pub fn key(&self, identifier: &str) -> String {
        format!("rate_limit:{}:{}", self.as_str(), identifier)
    }
}

/// Identifier shared by every request in the global scope.
pub const GLOBAL_IDENTIFIER: &str = "all";

/// Outcome of checking one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: u64,
    pub fail_open: bool,
}

/// Combined outcome over the three scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateVerdict {
    pub ip: RateDecision,
    pub api_key: RateDecision,
    pub global: RateDecision,
}

impl RateVerdict {
    pub fn allowed(&self) -> bool {
        self.ip.allowed && self.api_key.allowed && self.global.allowed
    }

    /// True when any scope was admitted because the store failed.
    pub fn fail_open(&self) -> bool {
        self.ip.fail_open || self.api_key.fail_open || self.global.fail_open
    }

    /// Latest reset time among the denying scopes.
    pub fn reset_at(&self) -> Option<u64> {
        [self.ip, self.api_key, self.global]
            .iter()
            .filter(|d| !d.allowed)
            .map(|d| d.reset_at)
            .max()
    }

    /// Seconds until the latest denying window resets, at least 1.
    pub fn retry_after(&self, now: u64) -> Option<u64> {
        self.reset_at().map(|reset| reset.saturating_sub(now).max(1))
    }
}

/// Fixed-window limiter shared by all requests.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn limit_for(&self, scope: Scope, max_override: Option<u32>) -> WindowLimit {
        let base = match scope {
            Scope::Ip => self.config.ip,
            Scope::ApiKey => self.config.api_key,
            Scope::Global => self.config.global,
        };
        WindowLimit {
            max_requests: max_override.unwrap_or(base.max_requests),
            ..base
        }
    }

    /// Check all three scopes for one request, concurrently.
    ///
    /// The key's own `rate_limit` replaces the apiKey scope maximum.
    pub async fn check_request(&self, client_ip: &str, key: &ApiKeyRecord) -> RateVerdict {
        self.check_request_at(client_ip, key, crate::security::unix_now()).await
    }

    pub async fn check_request_at(&self, client_ip: &str, key: &ApiKeyRecord, now: u64) -> RateVerdict {
        let (ip, api_key, global) = tokio::join!(
            self.check_at(Scope::Ip, client_ip, None, now),
            self.check_at(Scope::ApiKey, &key.key, key.rate_limit, now),
            self.check_at(Scope::Global, GLOBAL_IDENTIFIER, None, now),
        );
        RateVerdict { ip, api_key, global }
    }

    /// Check and count one request against a single scope.
    pub async fn check(&self, scope: Scope, identifier: &str, max_override: Option<u32>) -> RateDecision {
        self.check_at(scope, identifier, max_override, crate::security::unix_now())
            .await
    }

    pub async fn check_at(
        &self,
        scope: Scope,
        identifier: &str,
        max_override: Option<u32>,
        now: u64,
    ) -> RateDecision {
        let limit = self.limit_for(scope, max_override);

        if !self.config.enabled {
            return RateDecision {
                allowed: true,
                remaining: limit.max_requests,
                reset_at: now + limit.window_secs,
                fail_open: false,
            };
        }

        let key = scope.key(identifier);
        match self
            .store
            .increment_window(&key, limit.max_requests, limit.window_secs, now)
            .await
        {
            Ok(WindowCount { allowed: true, window }) => RateDecision {
                allowed: true,
                remaining: limit.max_requests.saturating_sub(window.count),
                reset_at: window.reset_time,
                fail_open: false,
            },
            Ok(WindowCount { allowed: false, window }) => RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: window.reset_time,
                fail_open: false,
            },
            Err(e) => self.fail_open(scope, e, now, limit),
        }
    }

    /// Read the current window without counting a request.
    pub async fn peek(&self, scope: Scope, identifier: &str) -> Result<Option<WindowState>, StoreError> {
        let key = scope.key(identifier);
        let raw = self.store.get(&key).await?;
        Ok(raw.and_then(|raw| WindowState::parse(&key, &raw)))
    }

    fn fail_open(&self, scope: Scope, error: StoreError, now: u64, limit: WindowLimit) -> RateDecision {
        tracing::warn!(scope = scope.as_str(), error = %error, "Rate limit store error, failing open");
        metrics::record_store_error("increment");
        metrics::record_fail_open("rate_limit");
        RateDecision {
            allowed: true,
            remaining: self.config.fail_open_remaining,
            reset_at: now + limit.window_secs,
            fail_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FailingStore;
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::time::Duration;

    const NOW: u64 = 1_700_000_000;

    fn config(ip_max: u32) -> RateLimitConfig {
        RateLimitConfig {
            ip: WindowLimit { max_requests: ip_max, window_secs: 900 },
            ..RateLimitConfig::default()
        }
    }

    fn key_record(rate_limit: Option<u32>) -> ApiKeyRecord {
        ApiKeyRecord {
            key: "bavel_test_key_123456".into(),
            name: "test".into(),
            rate_limit,
            permissions: HashSet::from(["analyze".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_window_admits_max_then_denies() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), config(3));

        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_at(Scope::Ip, "1.2.3.4", None, NOW).await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.reset_at, NOW + 900);
        }

        let denied = limiter.check_at(Scope::Ip, "1.2.3.4", None, NOW + 10).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, NOW + 900);

        // Denials do not count
        let window = limiter.peek(Scope::Ip, "1.2.3.4").await.unwrap().unwrap();
        assert_eq!(window, WindowState { count: 3, reset_time: NOW + 900 });

        // Other identifiers are independent
        assert!(limiter.check_at(Scope::Ip, "5.6.7.8", None, NOW).await.allowed);
    }

    #[tokio::test]
    async fn test_window_resets_at_reset_time() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), config(1));

        assert!(limiter.check_at(Scope::Ip, "ip", None, NOW).await.allowed);
        assert!(!limiter.check_at(Scope::Ip, "ip", None, NOW + 899).await.allowed);

        let fresh = limiter.check_at(Scope::Ip, "ip", None, NOW + 900).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.reset_at, NOW + 1800);
    }

    #[tokio::test]
    async fn test_store_layout() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), config(5));
        limiter.check_at(Scope::ApiKey, "k1", None, NOW).await;

        let raw = store.get("rate_limit:apiKey:k1").await.unwrap().unwrap();
        assert_eq!(raw, format!(r#"{{"count":1,"resetTime":{}}}"#, NOW + 900));
    }

    #[tokio::test]
    async fn test_key_override_and_combined_verdict() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitConfig::default());
        let key = key_record(Some(2));

        let first = limiter.check_request_at("9.9.9.9", &key, NOW).await;
        assert!(first.allowed());
        assert_eq!(first.ip.remaining, 49);
        assert_eq!(first.api_key.remaining, 1);
        assert_eq!(first.global.remaining, 999);

        limiter.check_request_at("9.9.9.9", &key, NOW).await;
        let third = limiter.check_request_at("9.9.9.9", &key, NOW + 100).await;
        assert!(!third.allowed());
        assert!(third.ip.allowed);
        assert!(!third.api_key.allowed);
        assert_eq!(third.reset_at(), Some(NOW + 900));
        assert_eq!(third.retry_after(NOW + 100), Some(800));
    }

    #[tokio::test]
    async fn test_denied_scope_still_counts_in_the_others() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), config(1));
        let key = key_record(None);

        assert!(limiter.check_request_at("7.7.7.7", &key, NOW).await.allowed());
        let denied = limiter.check_request_at("7.7.7.7", &key, NOW + 1).await;
        assert!(!denied.allowed());
        assert!(!denied.ip.allowed);

        let ip = limiter.peek(Scope::Ip, "7.7.7.7").await.unwrap().unwrap();
        assert_eq!(ip.count, 1);
        let global = limiter.peek(Scope::Global, GLOBAL_IDENTIFIER).await.unwrap().unwrap();
        assert_eq!(global.count, 2);
        let api_key = limiter.peek(Scope::ApiKey, &key.key).await.unwrap().unwrap();
        assert_eq!(api_key.count, 2);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), RateLimitConfig::default());

        let d = limiter.check_at(Scope::Global, GLOBAL_IDENTIFIER, None, NOW).await;
        assert!(d.allowed);
        assert!(d.fail_open);
        assert_eq!(d.remaining, 999);

        let verdict = limiter.check_request_at("1.1.1.1", &key_record(None), NOW).await;
        assert!(verdict.allowed());
        assert!(verdict.fail_open());
        assert_eq!(verdict.retry_after(NOW), None);
    }

    #[tokio::test]
    async fn test_corrupt_window_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("rate_limit:ip:1.2.3.4", "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let limiter = RateLimiter::new(store, config(3));
        let d = limiter.check_at(Scope::Ip, "1.2.3.4", None, NOW).await;
        assert!(d.allowed);
        assert!(!d.fail_open);
        assert_eq!(d.remaining, 2);
    }

    #[tokio::test]
    async fn test_disabled_limiter_never_touches_store() {
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            RateLimitConfig { enabled: false, ..RateLimitConfig::default() },
        );
        let d = limiter.check_at(Scope::Ip, "ip", None, NOW).await;
        assert!(d.allowed);
        assert!(!d.fail_open);
    }

    #[test]
    fn test_scope_names() {
        for scope in [Scope::Ip, Scope::ApiKey, Scope::Global] {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::ApiKey.key("abc"), "rate_limit:apiKey:abc");
    }
}
