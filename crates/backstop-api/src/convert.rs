// SPDX-License-Identifier: Apache-2.0

use crate::dto::{RollbackRecordDto, WebhookEnvelope};
use crate::errors::ApiError;
use backstop_model::{ErrorBudgetAlert, IncidentId, RollbackRecord, ServiceName};
use serde_json::json;

/// Normalizes an inbound webhook envelope into a domain alert.
///
/// Missing `service_name` or `thresholdValue` are boundary validation
/// failures; a missing window is tolerated and treated as instantaneous.
pub fn alert_from_envelope(
    envelope: &WebhookEnvelope,
    received_at_ms: u64,
) -> Result<ErrorBudgetAlert, ApiError> {
    let mut field_errors = Vec::new();

    let service_name = envelope
        .incident
        .resource
        .as_ref()
        .and_then(|r| r.service_name.as_deref());
    let service_name = match service_name {
        Some(raw) => match ServiceName::parse(raw) {
            Ok(name) => Some(name),
            Err(e) => {
                field_errors.push(json!({"field": "resource.service_name", "reason": e.0}));
                None
            }
        },
        None => {
            field_errors.push(json!({"field": "resource.service_name", "reason": "missing"}));
            None
        }
    };

    let error_rate = envelope
        .incident
        .condition
        .as_ref()
        .and_then(|c| c.threshold_value);
    if error_rate.is_none() {
        field_errors.push(json!({"field": "condition.thresholdValue", "reason": "missing"}));
    }

    let incident_id = match envelope.incident.incident_id.as_deref() {
        Some(raw) => match IncidentId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                field_errors.push(json!({"field": "incident.incident_id", "reason": e.0}));
                None
            }
        },
        None => {
            field_errors.push(json!({"field": "incident.incident_id", "reason": "missing"}));
            None
        }
    };

    let (Some(service_name), Some(error_rate), Some(incident_id)) =
        (service_name, error_rate, incident_id)
    else {
        return Err(ApiError::validation_failed(json!(field_errors)));
    };

    let window_seconds = envelope
        .incident
        .condition
        .as_ref()
        .and_then(|c| c.window_seconds)
        .unwrap_or(0);

    ErrorBudgetAlert::new(
        service_name,
        error_rate,
        window_seconds,
        received_at_ms,
        incident_id,
    )
    .map_err(|e| {
        ApiError::validation_failed(json!([
            {"field": "condition.thresholdValue", "reason": e.0}
        ]))
    })
}

#[must_use]
pub fn record_dto(record: &RollbackRecord) -> RollbackRecordDto {
    RollbackRecordDto {
        rollback_id: record.rollback_id.as_str().to_string(),
        service_name: record.service_name.as_str().to_string(),
        triggered_at_ms: record.triggered_at_ms,
        target_revision: record
            .target_revision
            .as_ref()
            .map(|r| r.as_str().to_string()),
        status: record.status.as_str().to_string(),
        reason: record.decision.reason.clone(),
        confidence: record.decision.confidence,
        completed_at_ms: record.completed_at_ms,
        triggered_by: String::from(record.triggered_by.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn envelope(body: Value) -> WebhookEnvelope {
        serde_json::from_value(body).expect("envelope json")
    }

    #[test]
    fn full_envelope_normalizes_into_alert() {
        let env = envelope(json!({
            "incident": {
                "incident_id": "inc-123",
                "policy_name": "error-budget-burn",
                "condition": {"thresholdValue": 0.025, "windowSeconds": 300},
                "resource": {"service_name": "checkout"}
            }
        }));
        let alert = alert_from_envelope(&env, 1_000).expect("alert");
        assert_eq!(alert.service_name.as_str(), "checkout");
        assert_eq!(alert.error_rate, 0.025);
        assert_eq!(alert.window_seconds, 300);
        assert_eq!(alert.received_at_ms, 1_000);
        assert_eq!(alert.source_incident_id.as_str(), "inc-123");
    }

    #[test]
    fn unknown_sender_fields_are_tolerated() {
        let env = envelope(json!({
            "incident": {
                "incident_id": "inc-1",
                "condition": {"thresholdValue": 0.02, "name": "burn-rate"},
                "resource": {"service_name": "checkout", "zone": "us-east1"},
                "state": "open"
            }
        }));
        assert!(alert_from_envelope(&env, 0).is_ok());
    }

    #[test]
    fn missing_service_and_rate_are_reported_together() {
        let env = envelope(json!({"incident": {"incident_id": "inc-1"}}));
        let err = alert_from_envelope(&env, 0).expect_err("validation failure");
        let fields = err.details["field_errors"]
            .as_array()
            .expect("field_errors array");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn out_of_range_rate_is_a_validation_failure() {
        let env = envelope(json!({
            "incident": {
                "incident_id": "inc-1",
                "condition": {"thresholdValue": 1.5},
                "resource": {"service_name": "checkout"}
            }
        }));
        assert!(alert_from_envelope(&env, 0).is_err());
    }

    #[test]
    fn missing_window_defaults_to_zero() {
        let env = envelope(json!({
            "incident": {
                "incident_id": "inc-1",
                "condition": {"thresholdValue": 0.02},
                "resource": {"service_name": "checkout"}
            }
        }));
        assert_eq!(alert_from_envelope(&env, 0).unwrap().window_seconds, 0);
    }
}
