//! The request pipeline.
//!
//! # Data Flow
//! ```text
//! MethodCheck → SizeCheck → FloodCheck → AuthCheck(ApiKey)
//!     → RateLimitCheck(ip, key, global) → BodyParse → SignatureCheck
//!     → Sanitize → PermissionCheck → UpstreamDispatch
//!     → ResponseDecorate → AuditLog
//! ```
//!
//! # Design Decisions
//! - One `Gateway` per configuration generation; reloads build a new one
//! - Every POST ends in exactly one audit event, pre-flight in none
//! - Store failures admit the request and flag its audit event
//! - A single upstream attempt, bounded by the upstream timeout

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};

use crate::config::schema::{GatewayConfig, UpstreamConfig};
use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::http::response::{decorate, error_response, forwarded_response, preflight_response};
use crate::observability::audit::{EventType, SecurityEvent, SecurityLogger, Severity};
use crate::observability::metrics;
use crate::routing::{Action, ActionRouter, Resolution};
use crate::security::auth::{ApiKeyRegistry, SignatureVerifier};
use crate::security::flood::FloodDetector;
use crate::security::headers::CorsPolicy;
use crate::security::limits::{read_limited, BodyError};
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitize::Sanitizer;
use crate::store::KvStore;

/// A request that cleared every check and got an upstream answer.
struct Forwarded {
    action: Action,
    status: StatusCode,
    body: Value,
    ip_remaining: u32,
    key_remaining: u32,
}

/// Compiled pipeline for one configuration generation.
pub struct Gateway {
    pub config: GatewayConfig,
    pub store: Arc<dyn KvStore>,
    pub registry: ApiKeyRegistry,
    pub rate_limiter: RateLimiter,
    pub flood: FloodDetector,
    verifier: SignatureVerifier,
    sanitizer: Sanitizer,
    router: ActionRouter,
    cors: CorsPolicy,
    logger: Arc<SecurityLogger>,
    client: reqwest::Client,
    upstream: UpstreamConfig,
    upstream_timeout: Duration,
}

impl Gateway {
    pub fn new(config: GatewayConfig, store: Arc<dyn KvStore>, client: reqwest::Client) -> Self {
        let logger = SecurityLogger::new(
            store.clone(),
            client.clone(),
            config.audit.clone(),
            Duration::from_secs(config.timeouts.alert_secs),
        );

        Self {
            registry: ApiKeyRegistry::from_config(&config.auth.api_keys),
            verifier: SignatureVerifier::new(config.auth.hmac_secret.as_bytes(), config.auth.replay_window_secs),
            sanitizer: Sanitizer::from_config(&config.security),
            rate_limiter: RateLimiter::new(store.clone(), config.rate_limit.clone()),
            flood: FloodDetector::new(store.clone(), config.flood.clone()),
            router: ActionRouter::from_config(&config.effective_routes(), &config.upstreams),
            cors: CorsPolicy::from_config(&config.cors),
            logger: Arc::new(logger),
            upstream: config.upstreams.clone(),
            upstream_timeout: Duration::from_secs(config.timeouts.upstream_secs),
            client,
            store,
            config,
        }
    }

    /// Build the next generation from a reloaded config, keeping the store
    /// and HTTP client.
    pub fn rebuild(&self, config: GatewayConfig) -> Self {
        Self::new(config, self.store.clone(), self.client.clone())
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    /// Run the full pipeline for one request.
    pub async fn handle(self: Arc<Self>, request: Request<Body>) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let ctx = RequestContext::from_parts(&parts, &self.config.listener.client_ip_header);

        if ctx.method == Method::OPTIONS {
            return decorate(preflight_response(), &self.cors, ctx.origin.as_deref());
        }

        let mut store_degraded = false;
        let outcome = self.process(&ctx, body, &mut store_degraded).await;

        let (response, mut event, action) = match outcome {
            Ok(fwd) => {
                let event = self.success_event(&ctx, &fwd, started);
                let response = forwarded_response(fwd.status, &fwd.body, fwd.ip_remaining, fwd.key_remaining);
                (response, event, fwd.action.as_str())
            }
            Err(err) => {
                if err.is_blocked() {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        client_ip = %ctx.client_ip,
                        reason = err.reason(),
                        status = err.status().as_u16(),
                        "Request rejected"
                    );
                } else {
                    tracing::error!(request_id = %ctx.request_id, error = ?err, "Request failed");
                }
                metrics::record_rejection(err.reason());
                let event = self
                    .event(&ctx, err.event_type(), err.severity())
                    .with_details(err.details())
                    .blocked(err.is_blocked());
                (error_response(&err), event, "none")
            }
        };

        if store_degraded {
            event.mark_store_degraded();
        }

        let response = decorate(response, &self.cors, ctx.origin.as_deref());
        metrics::record_request(action, response.status().as_u16(), started.elapsed().as_secs_f64());

        let logger = self.logger.clone();
        tokio::spawn(async move { logger.log(&event).await });

        response
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        body: Body,
        store_degraded: &mut bool,
    ) -> Result<Forwarded, GatewayError> {
        if ctx.method != Method::POST {
            return Err(GatewayError::MethodNotAllowed { method: ctx.method.to_string() });
        }

        let limit = self.config.security.max_body_bytes;
        if ctx.content_length > limit as u64 {
            return Err(GatewayError::PayloadTooLarge { declared: Some(ctx.content_length), limit });
        }

        let flood = self.flood.detect(&ctx.client_ip).await;
        *store_degraded |= flood.fail_open;
        if flood.is_flood {
            return Err(GatewayError::Flood {
                report: flood,
                retry_after: self.config.flood.burst_window_secs.max(1),
            });
        }

        let key = self.registry.validate(ctx.api_key.as_deref())?;

        let verdict = self.rate_limiter.check_request(&ctx.client_ip, &key).await;
        *store_degraded |= verdict.fail_open();
        if !verdict.allowed() {
            let retry_after = verdict.retry_after(crate::security::unix_now()).unwrap_or(1);
            return Err(GatewayError::RateLimited { verdict, retry_after });
        }

        let bytes = read_limited(body, limit).await.map_err(|e| match e {
            BodyError::TooLarge { limit } => GatewayError::PayloadTooLarge { declared: None, limit },
            BodyError::Read(e) => GatewayError::InvalidJson(e.to_string()),
        })?;
        let payload: Value =
            serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidJson(e.to_string()))?;

        self.verifier
            .verify(ctx.timestamp.as_deref(), ctx.signature.as_deref(), &payload)?;

        let sanitized = self.sanitizer.sanitize(&payload)?;

        let action = match self.router.resolve(&ctx.path, &sanitized) {
            Resolution::Action(action) if key.permits(action.as_str()) => action,
            denied => {
                let mut permissions: Vec<String> = key.permissions.iter().cloned().collect();
                permissions.sort();
                return Err(GatewayError::InsufficientPermissions {
                    action: denied.name().to_string(),
                    permissions,
                });
            }
        };

        let url = self.router.upstream_for(action).ok_or_else(|| {
            GatewayError::Configuration(format!("no upstream URL configured for action '{action}'"))
        })?;

        tracing::debug!(request_id = %ctx.request_id, action = %action, "Dispatching to upstream");
        let (status, body) = self.dispatch(ctx, url, &sanitized).await?;

        Ok(Forwarded {
            action,
            status,
            body,
            ip_remaining: verdict.ip.remaining,
            key_remaining: verdict.api_key.remaining,
        })
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: &Value,
    ) -> Result<(StatusCode, Value), GatewayError> {
        let extension_version = ctx
            .extension_version
            .as_deref()
            .unwrap_or(&self.upstream.default_extension_version);

        let response = self
            .client
            .post(url)
            .timeout(self.upstream_timeout)
            .header("x-forwarded-for", &ctx.client_ip)
            .header("x-real-ip", &ctx.client_ip)
            .header("x-extension-version", extension_version)
            .header(header::USER_AGENT, &self.upstream.user_agent)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("upstream request failed: {e}")))?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Upstream(format!("upstream returned a non-JSON body ({status}): {e}")))?;

        Ok((status, body))
    }

    fn event(&self, ctx: &RequestContext, event_type: EventType, severity: Severity) -> SecurityEvent {
        SecurityEvent::new(event_type, severity, &ctx.client_ip, &ctx.user_agent)
            .with_api_key(ctx.api_key.as_deref(), self.logger.api_key_prefix_len())
            .with_request_id(&ctx.request_id)
    }

    fn success_event(&self, ctx: &RequestContext, fwd: &Forwarded, started: Instant) -> SecurityEvent {
        if fwd.status.is_success() {
            self.event(ctx, EventType::RequestSuccess, Severity::Low).with_details(json!({
                "duration": started.elapsed().as_millis() as u64,
                "action": fwd.action,
                "status": fwd.status.as_u16(),
            }))
        } else {
            self.event(ctx, EventType::UpstreamError, Severity::Medium).with_details(json!({
                "action": fwd.action,
                "status": fwd.status.as_u16(),
                "statusText": fwd.status.canonical_reason().unwrap_or(""),
            }))
        }
    }
}
