//! Shutdown coordination for the gateway.
//!
//! One `Shutdown` is shared by the public listener (`HttpServer::run`), the
//! admin listener and, in tests, the harness that owns both. The first OS
//! signal or explicit `trigger` stops them all; each listener then drains
//! its in-flight requests.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::signals::wait_for_signal;

/// Broadcast stop signal for the gateway's listeners.
///
/// Clones share the channel, so any clone can trigger or subscribe.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for listeners that select on shutdown themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown is triggered, for `with_graceful_shutdown`.
    ///
    /// Subscribes now, so a trigger between this call and the first poll is
    /// not missed.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Stop every subscribed listener. A no-op when nothing is listening.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Trigger on the first SIGINT or SIGTERM.
    pub fn trigger_on_signal(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Stopping listeners");
            this.trigger();
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_every_listener() {
        let shutdown = Shutdown::new();
        let public = shutdown.signalled();
        let admin = shutdown.clone().signalled();
        let mut raw = shutdown.subscribe();

        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), async {
            public.await;
            admin.await;
            raw.recv().await.unwrap();
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_signalled_waits_for_trigger() {
        let shutdown = Shutdown::new();
        let pending = tokio::time::timeout(Duration::from_millis(50), shutdown.signalled()).await;
        assert!(pending.is_err());
    }
}
