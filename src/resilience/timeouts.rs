//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap store, upstream and alert calls with a deadline
//! - Keep timeout errors distinct from the wrapped operation's errors

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The wrapped operation did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {0:?} elapsed")]
pub struct DeadlineElapsed(pub Duration);

/// Run `fut` to completion or fail once `limit` has passed.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, DeadlineElapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineElapsed(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = with_deadline(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_elapsed_deadline() {
        let result = with_deadline(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert_eq!(result, Err(DeadlineElapsed(Duration::from_millis(10))));
    }
}
