//! Configuration file watcher for hot reload.
//!
//! Reloads run through the same loader and validation as startup, so an
//! invalid edit never replaces the running configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let ConfigWatcher { path, update_tx } = self;
        let callback_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_reload_event(&event) {
                        reload(&callback_path, &update_tx);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

fn is_reload_event(event: &Event) -> bool {
    event.kind.is_modify() || event.kind.is_create()
}

/// Load, validate and publish the configuration at `path`.
///
/// Returns true when a new configuration was published.
fn reload(path: &Path, tx: &mpsc::UnboundedSender<GatewayConfig>) -> bool {
    tracing::info!(path = ?path, "Config file change detected, reloading");
    match load_config(path) {
        Ok(new_config) => {
            if tx.send(new_config).is_err() {
                tracing::debug!("Config receiver dropped, ignoring reload");
                return false;
            }
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("bavel-watch-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reload_publishes_valid_config() {
        let path = temp_config("[flood]\nburst_requests = 25\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        assert!(reload(&path, &watcher.update_tx));
        let config = rx.try_recv().unwrap();
        assert_eq!(config.flood.burst_requests, 25);

        std::fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_reload_keeps_current_config_on_invalid_file() {
        let path = temp_config("[rate_limit.ip]\nmax_requests = 0\nwindow_secs = 0\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        assert!(!reload(&path, &watcher.update_tx));
        assert!(rx.try_recv().is_err());

        std::fs::remove_file(&path).unwrap_or_default();
    }
}
