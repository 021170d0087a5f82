//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use bavel_gateway::admin::setup_admin_router;
use bavel_gateway::config::schema::{ApiKeyConfig, GatewayConfig};
use bavel_gateway::http::HttpServer;
use bavel_gateway::lifecycle::Shutdown;
use bavel_gateway::security::auth::compute_signature;
use bavel_gateway::store::{KvStore, MemoryStore, StoreError};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const HMAC_SECRET: &str = "integration-test-secret";
pub const ANALYZE_KEY: &str = "bvl_analyze_only_0001";
pub const FULL_KEY: &str = "bvl_full_access_0002";
pub const ADMIN_TOKEN: &str = "admin-test-token";

/// One request seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Value,
}

/// A JSON upstream answering every POST with a fixed status and body.
pub struct MockUpstream {
    pub url: String,
    pub captured: Arc<Mutex<Vec<Captured>>>,
}

impl MockUpstream {
    pub fn requests(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    reply: Value,
    delay: Duration,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn mock_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    tokio::time::sleep(state.delay).await;
    state.captured.lock().unwrap().push(Captured { headers, body });
    (state.status, Json(state.reply.clone()))
}

pub async fn start_mock_upstream(status: u16, reply: Value) -> MockUpstream {
    start_delayed_upstream(status, reply, Duration::ZERO).await
}

/// Like `start_mock_upstream`, but a request is recorded only once `delay`
/// has passed and the reply is about to be sent.
pub async fn start_delayed_upstream(status: u16, reply: Value, delay: Duration) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));

    let state = MockState {
        status: StatusCode::from_u16(status).unwrap(),
        reply,
        delay,
        captured: captured.clone(),
    };
    let app = Router::new().route("/hook", post(mock_handler)).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream {
        url: format!("http://{addr}/hook"),
        captured,
    }
}

/// An upstream that answers only after `delay`.
pub async fn start_slow_upstream(delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/hook",
        post(move || async move {
            tokio::time::sleep(delay).await;
            Json(serde_json::json!({ "late": true }))
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/hook")
}

/// An address with nothing listening on it.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A store whose every call fails.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("injected failure".into()))
    }

    async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected failure".into()))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Fails calls for keys under `prefix`, delegates the rest.
pub struct PrefixFailingStore {
    pub inner: MemoryStore,
    pub prefix: &'static str,
}

#[async_trait]
impl KvStore for PrefixFailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if key.starts_with(self.prefix) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if key.starts_with(self.prefix) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.put(key, value, ttl).await
    }

    fn backend_name(&self) -> &'static str {
        "prefix-failing"
    }
}

/// Two keys (analyze-only and full access) and both upstreams pointed at `upstream_url`.
pub fn test_config(upstream_url: Option<&str>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.hmac_secret = HMAC_SECRET.into();
    config.auth.api_keys = vec![
        ApiKeyConfig {
            key: ANALYZE_KEY.into(),
            name: "Analyze Only".into(),
            rate_limit: None,
            permissions: vec!["analyze".into()],
        },
        ApiKeyConfig {
            key: FULL_KEY.into(),
            name: "Full Access".into(),
            rate_limit: None,
            permissions: vec!["analyze".into(), "translate".into()],
        },
    ];
    config.upstreams.analyze_url = upstream_url.map(str::to_string);
    config.upstreams.translate_url = upstream_url.map(str::to_string);
    config.timeouts.upstream_secs = 2;
    config.admin.api_key = ADMIN_TOKEN.into();
    config
}

/// A running gateway bound to an ephemeral port.
pub struct TestGateway {
    pub base_url: String,
    pub admin_url: String,
    pub reload: mpsc::UnboundedSender<GatewayConfig>,
    shutdown: Shutdown,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_gateway(config: GatewayConfig, store: Arc<dyn KvStore>) -> TestGateway {
    let shutdown = Shutdown::new();
    let (reload, config_updates) = mpsc::unbounded_channel();

    let server = HttpServer::new(config, store);

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_url = format!("http://{}", admin_listener.local_addr().unwrap());
    let admin_app = setup_admin_router(server.state());
    let admin_shutdown = shutdown.signalled();
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(admin_shutdown)
            .await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestGateway {
        base_url,
        admin_url,
        reload,
        shutdown,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Build a signed POST the way the extension does.
pub fn signed_post(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    payload: &Value,
    timestamp: u64,
) -> reqwest::RequestBuilder {
    let ts = timestamp.to_string();
    let signature = compute_signature(HMAC_SECRET.as_bytes(), &ts, payload).unwrap();
    client
        .post(url)
        .header("content-type", "application/json")
        .header("x-bavel-api-key", api_key)
        .header("x-bavel-signature", signature)
        .header("x-bavel-timestamp", ts)
        .body(serde_json::to_string(payload).unwrap())
}

/// Wait for spawned audit writes to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
