//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming POST:
//!     → limits.rs (declared body size)
//!     → flood.rs (per-IP burst / sustained rate)
//!     → auth.rs (API key)
//!     → rate_limit.rs (ip, apiKey, global windows)
//!     → auth.rs (HMAC signature over the parsed body)
//!     → sanitize.rs (strip + truncate)
//!     → Pass to routing
//! Every response:
//!     → headers.rs (security + CORS headers)
//! ```
//!
//! # Design Decisions
//! - Fail closed on authentication, fail open on store-backed counters
//! - No trust in client input
//! - Checks are plain values; the pipeline owns the order and the auditing

pub mod auth;
pub mod flood;
pub mod headers;
pub mod limits;
pub mod rate_limit;
pub mod sanitize;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current wall-clock time in unix milliseconds.
pub fn unix_now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
