//! Request body size limits.
//!
//! # Responsibilities
//! - Reject a declared `Content-Length` above the cap before reading
//! - Stop reading a body as soon as it grows past the cap
//!
//! # Design Decisions
//! - A missing or unparseable `Content-Length` counts as 0, the streamed
//!   read still enforces the cap
//! - The body is never buffered beyond `max + one frame`

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap};
use futures_util::StreamExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(#[from] axum::Error),
}

/// Declared `Content-Length`, or 0 when absent or malformed.
pub fn declared_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Read the whole body, failing once more than `max` bytes arrive.
pub async fn read_limited(body: Body, max: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > max {
            return Err(BodyError::TooLarge { limit: max });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), 0);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static(" 50001"));
        assert_eq!(declared_length(&headers), 50_001);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), 0);
    }

    #[tokio::test]
    async fn test_read_limited() {
        let bytes = read_limited(Body::from("{\"a\":1}"), 7).await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");

        let err = read_limited(Body::from(vec![b'x'; 100]), 99).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 99 }));
    }
}
