//! Bavel security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                 SECURITY GATEWAY                 │
//!                         │                                                  │
//!   Extension request     │  ┌────────┐   ┌──────────┐   ┌──────────────┐   │
//!   ──────────────────────┼─▶│  http  │──▶│ security │──▶│   routing    │   │
//!                         │  │ server │   │ pipeline │   │ action+URL   │   │
//!                         │  └────────┘   └────┬─────┘   └──────┬───────┘   │
//!                         │                    │                │           │
//!                         │                    ▼                ▼           │
//!                         │              ┌──────────┐    ┌────────────┐     │   Analysis
//!                         │              │  store   │    │  upstream  │─────┼──▶ webhooks
//!                         │              │ counters │    │  dispatch  │     │
//!                         │              └──────────┘    └────────────┘     │
//!                         │                                                  │
//!                         │  Cross-cutting: config (reload), observability   │
//!                         │  (logs, metrics, audit), lifecycle, admin API    │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use bavel_gateway::admin::setup_admin_router;
use bavel_gateway::config::loader::{load_config, load_from_env};
use bavel_gateway::config::watcher::ConfigWatcher;
use bavel_gateway::observability::{logging, metrics};
use bavel_gateway::{HttpServer, Shutdown};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "bavel-gateway")]
#[command(about = "Inbound security gateway for the Bavel extension", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults plus BAVEL_* variables when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bavel-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.backend,
        api_keys = config.auth.api_keys.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    // Keep the watcher alive for the whole run; dropping it stops reloads.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::from_config(config.clone()).await?;

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let admin_app = setup_admin_router(server.state());
        let admin_shutdown = shutdown.signalled();
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin_app)
                .with_graceful_shutdown(admin_shutdown)
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
