use crate::{controller, telemetry, unix_millis, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use backstop_api::{
    alert_from_envelope, map_error, record_dto, ApiError, MetricsSummaryDto, WebhookAck,
    WebhookEnvelope, API_VERSION,
};
use backstop_engine::CONFIG_SCHEMA_VERSION;
use backstop_model::{RevisionId, RollbackDecision, RollbackId, ServiceName, TriggeredBy};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

/// Upper bound on the `/rollback/recent` window; a year keeps the
/// millisecond window arithmetic far from overflow.
const MAX_RECENT_WINDOW_HOURS: u64 = 24 * 365;

fn make_request_id(state: &AppState) -> String {
    let id = state.request_id_seed.fetch_add(1, Ordering::Relaxed);
    format!("req-{id:016x}")
}

fn api_error_response(error: ApiError, request_id: &str) -> Response {
    let status = StatusCode::from_u16(map_error(&error).status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.with_request_id(request_id))).into_response()
}

// Takes the bare status code: holding a `&Response` across the await would
// make every handler future non-Send.
async fn observe(state: &AppState, route: &str, status: u16, started: Instant) {
    state
        .request_metrics
        .observe_request(route, status, started.elapsed())
        .await;
}

pub(crate) async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub(crate) async fn version_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": crate::CRATE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": API_VERSION,
        "config_schema_version": CONFIG_SCHEMA_VERSION,
        "rollback_enabled": state.rollback_enabled.load(Ordering::Relaxed),
    }))
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(&state.metrics, &state.request_metrics).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub(crate) async fn webhook_alert_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/webhook/error-budget-alert";
    state.metrics.alerts_received.fetch_add(1, Ordering::Relaxed);

    if !state
        .auth
        .verify(params.get("auth_token").map(String::as_str))
    {
        state
            .metrics
            .alerts_rejected_auth
            .fetch_add(1, Ordering::Relaxed);
        warn!(request_id = %request_id, "webhook rejected: bad auth token");
        let resp = api_error_response(ApiError::unauthorized(), &request_id);
        observe(&state, route, resp.status().as_u16(), started).await;
        return resp;
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            state
                .metrics
                .alerts_malformed
                .fetch_add(1, Ordering::Relaxed);
            warn!(request_id = %request_id, "webhook rejected: unparsable body: {e}");
            let resp =
                api_error_response(ApiError::malformed_payload(&e.to_string()), &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };

    let alert = match alert_from_envelope(&envelope, unix_millis()) {
        Ok(alert) => alert,
        Err(error) => {
            state
                .metrics
                .alerts_malformed
                .fetch_add(1, Ordering::Relaxed);
            warn!(request_id = %request_id, "webhook rejected: invalid fields");
            let resp = api_error_response(error, &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };

    if state.dedup.observe(&alert.source_incident_id).await {
        state
            .metrics
            .alerts_deduplicated
            .fetch_add(1, Ordering::Relaxed);
        info!(
            request_id = %request_id,
            incident = %alert.source_incident_id,
            "duplicate delivery acknowledged"
        );
        let resp = Json(WebhookAck {
            accepted: true,
            deduplicated: true,
            rollback_id: None,
        })
        .into_response();
        observe(&state, route, resp.status().as_u16(), started).await;
        return resp;
    }

    // The decision runs on its own task: if it overruns the webhook budget
    // the sender still gets its ack and the task finishes detached.
    let handle = tokio::spawn(controller::process_alert(state.clone(), alert));
    let rollback_id = match timeout(state.config.decision_timeout, handle).await {
        Ok(Ok(record)) => record.map(|record| record.rollback_id.as_str().to_string()),
        Ok(Err(join_error)) => {
            warn!(request_id = %request_id, "decision task aborted: {join_error}");
            None
        }
        Err(_) => {
            info!(
                request_id = %request_id,
                "decision exceeded webhook deadline; continuing in background"
            );
            None
        }
    };

    let resp = Json(WebhookAck {
        accepted: true,
        deduplicated: false,
        rollback_id,
    })
    .into_response();
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}

pub(crate) async fn rollback_status_handler(
    State(state): State<AppState>,
    Path(rollback_id): Path<String>,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/rollback/status";

    let resp = match RollbackId::parse(&rollback_id) {
        Err(_) => api_error_response(ApiError::rollback_not_found(&rollback_id), &request_id),
        Ok(id) => match state.store.get(&id).await {
            Some(record) => Json(record_dto(&record)).into_response(),
            None => api_error_response(ApiError::rollback_not_found(&rollback_id), &request_id),
        },
    };
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}

pub(crate) async fn rollback_recent_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/rollback/recent";

    let service = match params.get("service").map(|s| ServiceName::parse(s)) {
        Some(Ok(service)) => service,
        Some(Err(_)) | None => {
            let value = params.get("service").map(String::as_str).unwrap_or("");
            let resp =
                api_error_response(ApiError::invalid_param("service", value), &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };
    let hours = match params.get("hours").map(|h| h.parse::<u64>()) {
        None => 24,
        Some(Ok(hours)) if (1..=MAX_RECENT_WINDOW_HOURS).contains(&hours) => hours,
        Some(_) => {
            let value = params.get("hours").map(String::as_str).unwrap_or("");
            let resp = api_error_response(ApiError::invalid_param("hours", value), &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };

    let records = state
        .store
        .recent(&service, Duration::from_secs(hours * 3600), unix_millis())
        .await;
    let resp = Json(json!({
        "service": service.as_str(),
        "hours": hours,
        "records": records.iter().map(record_dto).collect::<Vec<_>>(),
    }))
    .into_response();
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}

pub(crate) async fn rollback_metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/rollback/metrics";

    let service = match params.get("service").filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match ServiceName::parse(raw) {
            Ok(service) => Some(service),
            Err(_) => {
                let resp = api_error_response(ApiError::invalid_param("service", raw), &request_id);
                observe(&state, route, resp.status().as_u16(), started).await;
                return resp;
            }
        },
    };
    let hours: u64 = 24;
    let window_start = unix_millis().saturating_sub(hours * 3600 * 1000);

    let records = match &service {
        Some(service) => state.store.service_history(service).await,
        None => state.store.all_records().await,
    };
    let windowed: Vec<_> = records
        .into_iter()
        .filter(|r| r.triggered_at_ms >= window_start)
        .collect();

    let succeeded = windowed
        .iter()
        .filter(|r| r.status == backstop_model::RollbackStatus::Succeeded)
        .count() as u64;
    let failed = windowed
        .iter()
        .filter(|r| r.status == backstop_model::RollbackStatus::Failed)
        .count() as u64;
    let skipped = windowed
        .iter()
        .filter(|r| r.status == backstop_model::RollbackStatus::Skipped)
        .count() as u64;
    let completed = succeeded + failed;
    let durations: Vec<u64> = windowed
        .iter()
        .filter(|r| {
            matches!(
                r.status,
                backstop_model::RollbackStatus::Succeeded | backstop_model::RollbackStatus::Failed
            )
        })
        .filter_map(|r| r.duration_ms())
        .collect();

    let summary = MetricsSummaryDto {
        service: service.map(|s| s.as_str().to_string()),
        window_hours: hours,
        total: windowed.len() as u64,
        succeeded,
        failed,
        skipped,
        success_rate: (completed > 0).then(|| succeeded as f64 / completed as f64),
        mean_duration_ms: (!durations.is_empty())
            .then(|| durations.iter().sum::<u64>() / durations.len() as u64),
    };
    let resp = Json(summary).into_response();
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}

pub(crate) async fn manual_rollback_handler(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/rollback/manual";

    let service = match ServiceName::parse(&service_name) {
        Ok(service) => service,
        Err(_) => {
            let resp =
                api_error_response(ApiError::invalid_param("service_name", &service_name), &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };
    let target = match params.get("target_revision").map(|r| RevisionId::parse(r)) {
        Some(Ok(target)) => target,
        Some(Err(_)) | None => {
            let value = params
                .get("target_revision")
                .map(String::as_str)
                .unwrap_or("");
            let resp =
                api_error_response(ApiError::invalid_param("target_revision", value), &request_id);
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };
    let operator = headers
        .get("x-operator-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string();

    // Operator triggers bypass threshold and confidence rails, but go
    // through the executor so the in-flight gate and audit trail hold.
    let decision = RollbackDecision::approved("manual operator trigger", 1.0, target);
    info!(
        request_id = %request_id,
        service = %service,
        operator = %operator,
        "manual rollback requested"
    );
    let resp = match state
        .executor
        .execute(service, decision, TriggeredBy::Operator(operator))
        .await
    {
        Ok(record) => Json(record_dto(&record)).into_response(),
        Err(e) => api_error_response(
            ApiError::new(
                backstop_api::ApiErrorCode::Internal,
                format!("rollback admission failed: {e}"),
                json!({}),
                "req-unknown",
            ),
            &request_id,
        ),
    };
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}

pub(crate) async fn kill_switch_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let route = "/rollback/kill-switch";

    let enabled = match params.get("enabled").map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        other => {
            let resp = api_error_response(
                ApiError::invalid_param("enabled", other.unwrap_or("")),
                &request_id,
            );
            observe(&state, route, resp.status().as_u16(), started).await;
            return resp;
        }
    };
    let operator = headers
        .get("x-operator-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown");

    state.rollback_enabled.store(enabled, Ordering::Relaxed);
    warn!(
        request_id = %request_id,
        operator = %operator,
        rollback_enabled = enabled,
        "kill switch toggled"
    );
    let resp = Json(json!({"rollback_enabled": enabled})).into_response();
    observe(&state, route, resp.status().as_u16(), started).await;
    resp
}
