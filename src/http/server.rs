//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the gateway handler on every path
//! - Wire up middleware (tracing, request ID, timeout, hardening headers)
//! - Swap the gateway atomically when a new configuration arrives
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::gateway::Gateway;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::{decorate, error_response};
use crate::security::headers::apply_security_headers;
use crate::store::{build_store, KvStore, StoreError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<Gateway>>,
}

/// HTTP server for the security gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a server over an existing store.
    pub fn new(config: GatewayConfig, store: Arc<dyn KvStore>) -> Self {
        let gateway = Gateway::new(config.clone(), store, reqwest::Client::new());
        let state = AppState {
            inner: Arc::new(ArcSwap::from_pointee(gateway)),
        };
        let router = Self::build_router(&config, state.clone());
        Self { router, state, config }
    }

    /// Create a server, connecting the configured store backend first.
    pub async fn from_config(config: GatewayConfig) -> Result<Self, StoreError> {
        let store = build_store(&config.store, Duration::from_millis(config.timeouts.store_ms)).await?;
        Ok(Self::new(config, store))
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::map_response(harden))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    /// Shared handle to the live gateway, for the admin API.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                let next = state.inner.load().rebuild(config);
                state.inner.store(Arc::new(next));
                tracing::info!("Gateway configuration swapped");
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config the server was started with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Runs the pipeline on its own task so a client disconnect cannot cancel
/// store writes or the upstream call half-way.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let gateway = state.inner.load_full();

    match tokio::spawn(gateway.clone().handle(request)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task failed");
            let err = GatewayError::Internal(e.to_string());
            decorate(error_response(&err), gateway.cors(), None)
        }
    }
}

/// Hardening headers on responses the handler never saw (timeouts).
async fn harden(mut response: Response) -> Response {
    apply_security_headers(response.headers_mut());
    response
}
