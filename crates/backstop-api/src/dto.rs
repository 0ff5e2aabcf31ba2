// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Inbound webhook body from the monitoring system. Unknown fields are
/// tolerated: the sender's schema grows without coordination with us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub incident: IncidentDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentDto {
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub policy_name: Option<String>,
    #[serde(default)]
    pub condition: Option<ConditionDto>,
    #[serde(default)]
    pub resource: Option<ResourceDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDto {
    /// Observed error rate that tripped the alerting condition.
    #[serde(rename = "thresholdValue", default)]
    pub threshold_value: Option<f64>,
    /// Seconds the condition was sustained before firing.
    #[serde(rename = "windowSeconds", default)]
    pub window_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDto {
    #[serde(default)]
    pub service_name: Option<String>,
}

/// Webhook acknowledgement. Always 200 for an authenticated, well-formed
/// delivery so the sender's at-least-once retries stay idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookAck {
    pub accepted: bool,
    pub deduplicated: bool,
    /// Present when the decision finished within the webhook's deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollbackRecordDto {
    pub rollback_id: String,
    pub service_name: String,
    pub triggered_at_ms: u64,
    pub target_revision: Option<String>,
    pub status: String,
    pub reason: String,
    pub confidence: f64,
    pub completed_at_ms: Option<u64>,
    pub triggered_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSummaryDto {
    pub service: Option<String>,
    pub window_hours: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Succeeded over (succeeded + failed); null until one attempt completes.
    pub success_rate: Option<f64>,
    pub mean_duration_ms: Option<u64>,
}
