//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, config swap)
//!     → request.rs (client IP, auth headers)
//!     → gateway.rs (security pipeline, upstream dispatch)
//!     → response.rs (JSON bodies, security + CORS headers)
//!     → Send to client
//! ```

pub mod gateway;
pub mod request;
pub mod response;
pub mod server;

pub use gateway::Gateway;
pub use request::{RequestContext, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
