//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger_on_signal → trigger → public + admin listeners stop accepting
//!     → drain → exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup in `main`: config, logging, store, then listeners
//! - Both listeners hang off one broadcast channel

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
