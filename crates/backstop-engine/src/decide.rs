use crate::config::ControllerConfig;
use backstop_model::{ErrorBudgetAlert, RevisionId, RollbackDecision, RollbackRecord, RollbackStatus};

/// Confidence ceiling; never report certainty for an automated guess.
const CONFIDENCE_CAP: f64 = 0.95;
/// Confidence of an alert sitting exactly at the budget threshold.
const CONFIDENCE_BASE: f64 = 0.7;
/// Confidence gained per unit of excess error rate.
const CONFIDENCE_SLOPE: f64 = 10.0;

/// Decides whether an alert warrants an automated rollback.
///
/// Pure function of the alert, the service's recent history, the cached
/// known-good revision, static configuration, the runtime kill switch and
/// the caller's clock. Negative outcomes are decisions, not errors; the
/// `reason` field says which rail fired.
///
/// A service that was rolled back to a revision that itself turns out bad
/// is not special-cased here: the cooldown rail answers until it expires,
/// and the escalation path is the operator's manual trigger.
#[must_use]
pub fn decide(
    alert: &ErrorBudgetAlert,
    history: &[RollbackRecord],
    last_known_good: Option<&RevisionId>,
    config: &ControllerConfig,
    rollback_enabled: bool,
    now_ms: u64,
) -> RollbackDecision {
    if !rollback_enabled {
        return RollbackDecision::rejected("rollbacks disabled", 0.0);
    }

    if alert.error_rate <= config.error_budget_threshold {
        return RollbackDecision::rejected("below threshold", 0.0);
    }

    let window_ms = config.rate_limit_window.as_millis() as u64;
    let window_start = now_ms.saturating_sub(window_ms);
    let recent_attempts = history
        .iter()
        .filter(|r| r.status != RollbackStatus::Skipped && r.triggered_at_ms >= window_start)
        .count();
    if recent_attempts >= config.max_rollbacks_per_window as usize {
        return RollbackDecision::rejected("rate limit exceeded", 0.0);
    }

    // Skipped attempts never shifted traffic, so they do not restart the
    // cooldown clock.
    let cooldown_ms = config.cooldown.as_millis() as u64;
    let last_completed = history
        .iter()
        .filter(|r| r.status != RollbackStatus::Skipped)
        .filter_map(|r| r.completed_at_ms)
        .max();
    if let Some(completed_ms) = last_completed {
        if now_ms.saturating_sub(completed_ms) < cooldown_ms {
            return RollbackDecision::rejected("cooldown active", 0.0);
        }
    }

    let excess = alert.error_rate - config.error_budget_threshold;
    let confidence = (CONFIDENCE_BASE + excess * CONFIDENCE_SLOPE).min(CONFIDENCE_CAP);

    if confidence >= config.confidence_threshold {
        let Some(target) = last_known_good else {
            // Never roll back to an unknown target, however confident.
            return RollbackDecision::rejected("no known-good revision", confidence);
        };
        return RollbackDecision::approved(
            format!(
                "error rate {:.4} exceeds budget threshold {:.4}",
                alert.error_rate, config.error_budget_threshold
            ),
            confidence,
            target.clone(),
        );
    }

    RollbackDecision::rejected("confidence below threshold", confidence)
}
