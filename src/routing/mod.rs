//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Sanitized request (path, body)
//!     → router.rs (ordered matcher evaluation)
//!     → matcher.rs (path prefix → body field → default)
//!     → Resolution: known Action or Unknown(name)
//!     → router.rs (Action → upstream URL)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always resolves to the same action
//! - First match wins

pub mod matcher;
pub mod router;

pub use matcher::{Action, Resolution};
pub use router::ActionRouter;
