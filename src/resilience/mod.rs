//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to store / upstream / alert webhook:
//!     → timeouts.rs (enforce deadline)
//!     → on expiry the caller applies its own policy:
//!         store      → fail open
//!         upstream   → 500, no retry
//!         alert      → logged and dropped
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries inside the gateway; the extension owns retry/backoff

pub mod timeouts;
