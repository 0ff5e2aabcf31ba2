use crate::{unix_millis, AppState};
use backstop_model::{ErrorBudgetAlert, RollbackRecord, TriggeredBy};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Runs one deduplicated alert through the decision engine and, on approval,
/// hands it to the executor. Called from the webhook task, possibly past the
/// webhook's response deadline; it never touches the HTTP response. Returns
/// the admitted record, `None` for any no-rollback outcome.
pub(crate) async fn process_alert(
    state: AppState,
    alert: ErrorBudgetAlert,
) -> Option<RollbackRecord> {
    let service = alert.service_name.clone();

    // Refresh the known-good cache from the source of truth before deciding.
    // A cached value from an earlier observation still serves on error.
    match state.deploy.serving_revision(&service).await {
        Ok(Some(revision)) => {
            state
                .store
                .observe_stable_revision(&service, revision)
                .await;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(service = %service, "serving-revision lookup failed: {e}");
        }
    }

    let history = state.store.service_history(&service).await;
    let last_known_good = state.store.last_known_good(&service).await;
    let decision = backstop_engine::decide(
        &alert,
        &history,
        last_known_good.as_ref(),
        &state.config,
        state.rollback_enabled.load(Ordering::Relaxed),
        unix_millis(),
    );
    state
        .metrics
        .observe_decision(decision.should_rollback, &decision.reason)
        .await;
    info!(
        service = %service,
        incident = %alert.source_incident_id,
        should_rollback = decision.should_rollback,
        confidence = decision.confidence,
        reason = %decision.reason,
        "decision"
    );

    if !decision.should_rollback {
        return None;
    }

    match state
        .executor
        .execute(service.clone(), decision, TriggeredBy::Automated)
        .await
    {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(service = %service, "executor refused rollback: {e}");
            None
        }
    }
}
