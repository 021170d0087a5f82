use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::schema::{FloodConfig, RateLimitConfig};
use crate::http::server::AppState;
use crate::observability::audit::mask_api_key;
use crate::security::rate_limit::{Scope, WindowState};
use crate::store::KvStore;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub store_backend: &'static str,
    pub store_reachable: bool,
    pub api_keys: usize,
}

#[derive(Serialize)]
pub struct KeySummary {
    pub name: String,
    pub key: String,
    pub rate_limit: Option<u32>,
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
pub struct LimitsSummary {
    pub rate_limit: RateLimitConfig,
    pub flood: FloodConfig,
}

#[derive(Serialize)]
pub struct WindowSummary {
    pub scope: Scope,
    pub identifier: String,
    pub key: String,
    pub window: Option<WindowState>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load_full();
    let store_reachable = inner.store.get("admin:ping").await.is_ok();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if store_reachable { "operational" } else { "degraded" },
        store_backend: inner.store.backend_name(),
        store_reachable,
        api_keys: inner.registry.len(),
    })
}

pub async fn get_keys(State(state): State<AppState>) -> Json<Vec<KeySummary>> {
    let inner = state.inner.load();
    let prefix_len = inner.config.audit.api_key_prefix_len;

    let keys = inner
        .registry
        .records()
        .into_iter()
        .map(|record| {
            let mut permissions: Vec<String> = record.permissions.iter().cloned().collect();
            permissions.sort();
            KeySummary {
                name: record.name.clone(),
                key: mask_api_key(&record.key, prefix_len),
                rate_limit: record.rate_limit,
                permissions,
            }
        })
        .collect();

    Json(keys)
}

pub async fn get_limits(State(state): State<AppState>) -> Json<LimitsSummary> {
    let inner = state.inner.load();
    Json(LimitsSummary {
        rate_limit: inner.rate_limiter.config().clone(),
        flood: inner.flood.config().clone(),
    })
}

pub async fn get_rate_limit(
    State(state): State<AppState>,
    Path((scope, identifier)): Path<(String, String)>,
) -> Result<Json<WindowSummary>, (StatusCode, Json<Value>)> {
    let scope = Scope::parse(&scope).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "scope must be one of ip, apiKey, global" })),
        )
    })?;

    let inner = state.inner.load_full();
    let window = inner.rate_limiter.peek(scope, &identifier).await.map_err(|e| {
        tracing::warn!(error = %e, "Admin window lookup failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "counter store unavailable" })),
        )
    })?;

    Ok(Json(WindowSummary {
        scope,
        key: scope.key(&identifier),
        identifier,
        window,
    }))
}
