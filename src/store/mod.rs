//! Key-value counter store.
//!
//! # Data Flow
//! ```text
//! rate_limit.rs / flood.rs / audit.rs
//!     → TimedStore (per-call deadline)
//!     → MemoryStore (single node, tests) | RedisStore (shared across instances)
//! ```
//!
//! # Design Decisions
//! - The store is the gateway's only shared mutable state
//! - Plain get/put with TTL, plus one fixed-window check-and-count
//! - `increment_window` defaults to get-then-put; backends with server-side
//!   scripting (Redis) override it so the check and count are atomic
//! - Callers own the failure policy; the store only reports errors

pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::{StoreBackend, StoreConfig};
use crate::resilience::timeouts::with_deadline;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation '{op}' timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("corrupt value at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Stored counter for one fixed window, as JSON `{"count":n,"resetTime":t}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u32,
    #[serde(rename = "resetTime")]
    pub reset_time: u64,
}

impl WindowState {
    /// An unreadable counter reads as absent so the window starts fresh.
    pub fn parse(key: &str, raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(window) => Some(window),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unreadable rate limit window");
                None
            }
        }
    }

    /// Count one request against `current`. A full window is returned
    /// unchanged with `allowed == false`.
    pub fn advance(current: Option<Self>, limit: u32, window_secs: u64, now: u64) -> WindowCount {
        match current {
            Some(window) if now < window.reset_time => {
                if window.count >= limit {
                    return WindowCount { allowed: false, window };
                }
                WindowCount {
                    allowed: true,
                    window: WindowState {
                        count: window.count + 1,
                        reset_time: window.reset_time,
                    },
                }
            }
            _ => WindowCount {
                allowed: true,
                window: WindowState {
                    count: 1,
                    reset_time: now + window_secs,
                },
            },
        }
    }
}

/// Outcome of one check-and-count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub allowed: bool,
    pub window: WindowState,
}

/// A TTL-capable key-value store.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value that expires after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Admit and count one request in the fixed window at `key`.
    ///
    /// The default reads then writes without locking: concurrent callers on
    /// the same key may both read the same count, so a window can admit up
    /// to `limit + racers - 1` requests. Denials are not written.
    async fn increment_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<WindowCount, StoreError> {
        let current = self
            .get(key)
            .await?
            .and_then(|raw| WindowState::parse(key, &raw));

        let outcome = WindowState::advance(current, limit, window_secs, now);
        if !outcome.allowed {
            return Ok(outcome);
        }

        let value = serde_json::to_string(&outcome.window).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let ttl = Duration::from_secs(outcome.window.reset_time.saturating_sub(now).max(1));
        self.put(key, &value, ttl).await?;
        Ok(outcome)
    }

    /// Short backend name for logs and the admin API.
    fn backend_name(&self) -> &'static str;
}

/// Decorator bounding every store call with a deadline.
pub struct TimedStore {
    inner: Arc<dyn KvStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl KvStore for TimedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        with_deadline(self.timeout, self.inner.get(key))
            .await
            .map_err(|_| StoreError::Timeout { op: "get", timeout: self.timeout })?
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        with_deadline(self.timeout, self.inner.put(key, value, ttl))
            .await
            .map_err(|_| StoreError::Timeout { op: "put", timeout: self.timeout })?
    }

    async fn increment_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<WindowCount, StoreError> {
        with_deadline(self.timeout, self.inner.increment_window(key, limit, window_secs, now))
            .await
            .map_err(|_| StoreError::Timeout { op: "increment", timeout: self.timeout })?
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

/// Build the configured backend, wrapped with the store timeout.
pub async fn build_store(config: &StoreConfig, timeout: Duration) -> Result<Arc<dyn KvStore>, StoreError> {
    let backend: Arc<dyn KvStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory counter store; limits are not shared between instances");
            let store = MemoryStore::new();
            spawn_purge_task(store.clone(), Duration::from_secs(60));
            Arc::new(store)
        }
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
    };

    tracing::info!(backend = backend.backend_name(), "Counter store ready");
    Ok(Arc::new(TimedStore::new(backend, timeout)))
}

/// Periodically drop expired entries nobody reads again (e.g. audit records).
fn spawn_purge_task(store: MemoryStore, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = store.len(), "Purged expired store entries");
            }
        }
    });
}
