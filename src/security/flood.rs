//! Per-IP flood detection.
//!
//! Keeps a rolling log of recent request times per client IP and flags the
//! client when either the sustained rate over the window or the number of
//! requests in the short burst window crosses its threshold. Runs before
//! authentication, so unauthenticated floods are cut off early.
//!
//! Store errors never block traffic: the detector reports no flood.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::schema::FloodConfig;
use crate::observability::metrics;
use crate::store::KvStore;

/// Result of recording one request from a client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloodReport {
    pub is_flood: bool,
    pub requests_per_second: f64,
    pub burst_count: u32,
    pub total_requests: u32,
    pub fail_open: bool,
}

impl FloodReport {
    fn clear(fail_open: bool) -> Self {
        Self {
            is_flood: false,
            requests_per_second: 0.0,
            burst_count: 0,
            total_requests: 0,
            fail_open,
        }
    }
}

pub struct FloodDetector {
    store: Arc<dyn KvStore>,
    config: FloodConfig,
}

impl FloodDetector {
    pub fn new(store: Arc<dyn KvStore>, config: FloodConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    pub fn key(client_ip: &str) -> String {
        format!("flood_pattern:{client_ip}")
    }

    /// Record a request from `client_ip` and report whether it is flooding.
    pub async fn detect(&self, client_ip: &str) -> FloodReport {
        self.detect_at(client_ip, crate::security::unix_now()).await
    }

    pub async fn detect_at(&self, client_ip: &str, now: u64) -> FloodReport {
        if !self.config.enabled {
            return FloodReport::clear(false);
        }

        let key = Self::key(client_ip);
        let window = self.config.window_secs;

        let stored: Vec<u64> = match self.store.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable flood samples");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => return self.fail_open("get", &e),
        };

        let mut recent: Vec<u64> = stored
            .into_iter()
            .filter(|&t| now.saturating_sub(t) < window)
            .collect();
        recent.push(now);

        let keep_from = recent.len().saturating_sub(self.config.max_samples);
        let persisted = match serde_json::to_string(&recent[keep_from..]) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode flood samples");
                return FloodReport::clear(true);
            }
        };
        if let Err(e) = self
            .store
            .put(&key, &persisted, Duration::from_secs(window.saturating_mul(2)))
            .await
        {
            return self.fail_open("put", &e);
        }

        let total = recent.len() as u32;
        let requests_per_second = total as f64 / window as f64;
        let burst_count = recent
            .iter()
            .filter(|&&t| now.saturating_sub(t) < self.config.burst_window_secs)
            .count() as u32;

        FloodReport {
            is_flood: requests_per_second > self.config.requests_per_second
                || burst_count > self.config.burst_requests,
            requests_per_second,
            burst_count,
            total_requests: total,
            fail_open: false,
        }
    }

    fn fail_open(&self, op: &'static str, error: &crate::store::StoreError) -> FloodReport {
        tracing::warn!(op, error = %error, "Flood detector store error, failing open");
        metrics::record_store_error(op);
        metrics::record_fail_open("flood");
        FloodReport::clear(true)
    }
}
