use serde::Serialize;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

/// All tunables of the rollback controller. Loaded once at startup and
/// passed by reference; decision logic never reads the environment.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerConfig {
    /// Error-budget threshold; rates at or below it never trigger.
    pub error_budget_threshold: f64,
    /// Minimum confidence for an automated rollback.
    pub confidence_threshold: f64,
    /// Max non-skipped rollbacks per service per trailing window.
    pub max_rollbacks_per_window: u32,
    pub rate_limit_window: Duration,
    /// Minimum quiet interval after a completed rollback.
    pub cooldown: Duration,
    /// Global kill switch default; togglable at runtime through the API.
    pub rollback_enabled: bool,
    /// TTL of the webhook idempotency cache.
    pub dedup_ttl: Duration,
    /// Webhook-side budget for the synchronous decision handoff.
    pub decision_timeout: Duration,
    /// Overall deadline for one canary rollout.
    pub execution_deadline: Duration,
    /// Pause between deployment-API status polls.
    pub poll_interval: Duration,
    /// Progressive traffic percentages, ascending, ending at 100.
    pub traffic_steps: Vec<u8>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            error_budget_threshold: 0.01,
            confidence_threshold: 0.8,
            max_rollbacks_per_window: 3,
            rate_limit_window: Duration::from_secs(3600),
            cooldown: Duration::from_secs(1800),
            rollback_enabled: true,
            dedup_ttl: Duration::from_secs(300),
            decision_timeout: Duration::from_secs(10),
            execution_deadline: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            traffic_steps: vec![25, 50, 100],
        }
    }
}

pub fn validate_startup_config_contract(cfg: &ControllerConfig) -> Result<(), String> {
    if !(0.0..=1.0).contains(&cfg.error_budget_threshold) {
        return Err("error_budget_threshold must be within [0, 1]".to_string());
    }
    if !(0.0..=1.0).contains(&cfg.confidence_threshold) {
        return Err("confidence_threshold must be within [0, 1]".to_string());
    }
    if cfg.max_rollbacks_per_window == 0 {
        return Err("max_rollbacks_per_window must be > 0".to_string());
    }
    if cfg.rate_limit_window.is_zero() || cfg.cooldown.is_zero() {
        return Err("rate-limit window and cooldown must be > 0".to_string());
    }
    if cfg.dedup_ttl.is_zero() || cfg.decision_timeout.is_zero() {
        return Err("dedup ttl and decision timeout must be > 0".to_string());
    }
    if cfg.execution_deadline.is_zero() || cfg.poll_interval.is_zero() {
        return Err("execution deadline and poll interval must be > 0".to_string());
    }
    if cfg.poll_interval >= cfg.execution_deadline {
        return Err("poll interval must be shorter than the execution deadline".to_string());
    }
    if cfg.traffic_steps.is_empty() || cfg.traffic_steps.last() != Some(&100) {
        return Err("traffic steps must be non-empty and end at 100".to_string());
    }
    if !cfg
        .traffic_steps
        .windows(2)
        .all(|w| w[0] < w[1] && w[0] > 0)
    {
        return Err("traffic steps must be strictly ascending and positive".to_string());
    }
    Ok(())
}
