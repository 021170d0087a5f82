//! Client for the Bavel security gateway.
//!
//! Signs each payload with the shared HMAC secret and retries transient
//! failures with exponential backoff.

pub mod backoff;
pub mod client;

pub use client::{AnalyzeRequest, ApiResponse, SdkError, SecureClient, TranslateRequest};
