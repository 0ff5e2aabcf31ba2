#![forbid(unsafe_code)]

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use backstop_engine::ControllerConfig;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

mod auth;
mod controller;
mod dedup;
mod deploy;
mod executor;
mod http;
mod middleware;
mod store;
mod telemetry;

pub use auth::{SharedTokenAuthenticator, WebhookAuthenticator};
pub use dedup::DedupCache;
pub use deploy::{DeployError, DeploymentApi, FakeDeploymentApi, HttpDeploymentApi};
pub use executor::RollbackExecutor;
pub use store::{RollbackStateStore, StoreError};
pub use telemetry::{ControllerMetrics, RequestMetrics};

pub const CRATE_NAME: &str = "backstop-server";

/// Unix milliseconds; zero on a clock before the epoch rather than a panic.
#[must_use]
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Process-level settings for the HTTP surface; controller tunables live in
/// [`ControllerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub webhook_auth_token: String,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            webhook_auth_token: String::new(),
            max_body_bytes: 64 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub fn validate_server_config_contract(server: &ServerConfig) -> Result<(), String> {
    if server.webhook_auth_token.trim().is_empty() {
        return Err("webhook_auth_token must be configured".to_string());
    }
    if server.max_body_bytes == 0 {
        return Err("max_body_bytes must be > 0".to_string());
    }
    if server.request_timeout.is_zero() {
        return Err("request_timeout must be > 0".to_string());
    }
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ControllerConfig>,
    pub server: Arc<ServerConfig>,
    pub store: Arc<RollbackStateStore>,
    pub executor: Arc<RollbackExecutor>,
    pub deploy: Arc<dyn DeploymentApi>,
    pub auth: Arc<dyn WebhookAuthenticator>,
    pub dedup: Arc<DedupCache>,
    /// Runtime kill switch; the engine's first check reads this.
    pub rollback_enabled: Arc<AtomicBool>,
    pub ready: Arc<AtomicBool>,
    pub metrics: Arc<ControllerMetrics>,
    pub request_metrics: Arc<RequestMetrics>,
    pub(crate) request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        server: ServerConfig,
        deploy: Arc<dyn DeploymentApi>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(RollbackStateStore::default());
        let metrics = Arc::new(ControllerMetrics::default());
        let auth: Arc<dyn WebhookAuthenticator> = Arc::new(SharedTokenAuthenticator::new(
            server.webhook_auth_token.clone(),
        ));
        let executor = Arc::new(RollbackExecutor::new(
            Arc::clone(&store),
            Arc::clone(&deploy),
            Arc::clone(&config),
            Arc::clone(&metrics),
        ));
        Self {
            dedup: Arc::new(DedupCache::new(config.dedup_ttl, 4096)),
            rollback_enabled: Arc::new(AtomicBool::new(config.rollback_enabled)),
            ready: Arc::new(AtomicBool::new(true)),
            request_metrics: Arc::new(RequestMetrics::default()),
            request_id_seed: Arc::new(AtomicU64::new(1)),
            server: Arc::new(server),
            config,
            store,
            executor,
            deploy,
            auth,
            metrics,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::healthz_handler))
        .route("/readyz", get(http::readyz_handler))
        .route("/metrics", get(http::metrics_handler))
        .route("/v1/version", get(http::version_handler))
        .route(
            "/webhook/error-budget-alert",
            post(http::webhook_alert_handler),
        )
        .route(
            "/rollback/status/:rollback_id",
            get(http::rollback_status_handler),
        )
        .route("/rollback/recent", get(http::rollback_recent_handler))
        .route("/rollback/metrics", get(http::rollback_metrics_handler))
        .route(
            "/rollback/manual/:service_name",
            post(http::manual_rollback_handler),
        )
        .route("/rollback/kill-switch", post(http::kill_switch_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_tracing_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.server.max_body_bytes))
        .with_state(state)
}
