//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): terminal outcomes by action, status
//! - `gateway_request_duration_seconds` (histogram): pipeline latency
//! - `gateway_rejections_total` (counter): rejections by reason
//! - `gateway_fail_open_total` (counter): admissions granted because the store failed
//! - `gateway_store_errors_total` (counter): store errors by operation
//! - `gateway_alerts_total` (counter): alert webhook outcomes
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Label values are static strings

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(action: &'static str, status: u16, duration_secs: f64) {
    counter!("gateway_requests_total", "action" => action, "status" => status.to_string()).increment(1);
    histogram!("gateway_request_duration_seconds", "action" => action).record(duration_secs);
}

pub fn record_rejection(reason: &'static str) {
    counter!("gateway_rejections_total", "reason" => reason).increment(1);
}

pub fn record_fail_open(component: &'static str) {
    counter!("gateway_fail_open_total", "component" => component).increment(1);
}

pub fn record_store_error(op: &'static str) {
    counter!("gateway_store_errors_total", "op" => op).increment(1);
}

pub fn record_alert(outcome: &'static str) {
    counter!("gateway_alerts_total", "outcome" => outcome).increment(1);
}
