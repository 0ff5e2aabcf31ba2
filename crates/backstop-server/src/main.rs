#![forbid(unsafe_code)]

use backstop_engine::{validate_startup_config_contract, ControllerConfig};
use backstop_server::{
    build_router, validate_server_config_contract, AppState, DeploymentApi, HttpDeploymentApi,
    ServerConfig,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(name, default_secs))
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn controller_config_from_env() -> ControllerConfig {
    let defaults = ControllerConfig::default();
    ControllerConfig {
        error_budget_threshold: env_f64(
            "BACKSTOP_ERROR_BUDGET_THRESHOLD",
            defaults.error_budget_threshold,
        ),
        confidence_threshold: env_f64(
            "BACKSTOP_CONFIDENCE_THRESHOLD",
            defaults.confidence_threshold,
        ),
        max_rollbacks_per_window: env_u32(
            "BACKSTOP_MAX_ROLLBACKS_PER_WINDOW",
            defaults.max_rollbacks_per_window,
        ),
        rate_limit_window: env_duration_secs(
            "BACKSTOP_RATE_LIMIT_WINDOW_SECS",
            defaults.rate_limit_window.as_secs(),
        ),
        cooldown: env_duration_secs("BACKSTOP_COOLDOWN_SECS", defaults.cooldown.as_secs()),
        rollback_enabled: env_bool("BACKSTOP_ROLLBACK_ENABLED", defaults.rollback_enabled),
        dedup_ttl: env_duration_secs("BACKSTOP_DEDUP_TTL_SECS", defaults.dedup_ttl.as_secs()),
        decision_timeout: env_duration_secs(
            "BACKSTOP_DECISION_TIMEOUT_SECS",
            defaults.decision_timeout.as_secs(),
        ),
        execution_deadline: env_duration_secs(
            "BACKSTOP_EXECUTION_DEADLINE_SECS",
            defaults.execution_deadline.as_secs(),
        ),
        poll_interval: env_duration_secs(
            "BACKSTOP_POLL_INTERVAL_SECS",
            defaults.poll_interval.as_secs(),
        ),
        traffic_steps: defaults.traffic_steps,
    }
}

fn server_config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        bind_addr: env_string("BACKSTOP_BIND_ADDR", &defaults.bind_addr),
        webhook_auth_token: env_string("BACKSTOP_WEBHOOK_AUTH_TOKEN", ""),
        max_body_bytes: env_usize("BACKSTOP_MAX_BODY_BYTES", defaults.max_body_bytes),
        request_timeout: env_duration_secs(
            "BACKSTOP_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        ),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = controller_config_from_env();
    let server = server_config_from_env();
    if let Err(e) = validate_startup_config_contract(&config) {
        error!("invalid controller configuration: {e}");
        std::process::exit(2);
    }
    if let Err(e) = validate_server_config_contract(&server) {
        error!("invalid server configuration: {e}");
        std::process::exit(2);
    }

    let deploy_url = env_string("BACKSTOP_DEPLOY_API_URL", "http://localhost:9090");
    let deploy: Arc<dyn DeploymentApi> =
        match HttpDeploymentApi::new(&deploy_url, server.request_timeout) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("deployment api client: {e}");
                std::process::exit(2);
            }
        };

    let bind_addr = server.bind_addr.clone();
    let state = AppState::new(config, server, deploy);
    let app = build_router(state);

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, deploy_api = %deploy_url, "backstop listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!("server exited: {e}");
        std::process::exit(1);
    }
}
