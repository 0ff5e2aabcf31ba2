use crate::names::{RevisionId, RollbackId, ServiceName, ValidationError};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one rollback attempt.
///
/// `pending → in_progress → {succeeded, failed, skipped}`; the three
/// terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl RollbackStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who initiated a rollback; serialized as `"automated"` or `"operator:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TriggeredBy {
    Automated,
    Operator(String),
}

impl From<TriggeredBy> for String {
    fn from(value: TriggeredBy) -> Self {
        match value {
            TriggeredBy::Automated => "automated".to_string(),
            TriggeredBy::Operator(id) => format!("operator:{id}"),
        }
    }
}

impl TryFrom<String> for TriggeredBy {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "automated" {
            return Ok(Self::Automated);
        }
        if let Some(id) = value.strip_prefix("operator:") {
            if id.is_empty() {
                return Err(ValidationError("operator id must not be empty".to_string()));
            }
            return Ok(Self::Operator(id.to_string()));
        }
        Err(ValidationError(format!(
            "triggered_by must be 'automated' or 'operator:<id>', got '{value}'"
        )))
    }
}

/// Output of the decision engine for one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackDecision {
    pub should_rollback: bool,
    pub reason: String,
    /// How strongly the observed error rate justifies the rollback, `[0, 1]`.
    pub confidence: f64,
    pub target_revision: Option<RevisionId>,
}

impl RollbackDecision {
    /// A negative decision. Never an error: "below threshold" and
    /// "rollbacks disabled" are valid outcomes, not failures.
    #[must_use]
    pub fn rejected(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            should_rollback: false,
            reason: reason.into(),
            confidence,
            target_revision: None,
        }
    }

    /// A positive decision; the target revision is mandatory by construction
    /// so `should_rollback=true` can never carry an empty target.
    #[must_use]
    pub fn approved(reason: impl Into<String>, confidence: f64, target: RevisionId) -> Self {
        Self {
            should_rollback: true,
            reason: reason.into(),
            confidence,
            target_revision: Some(target),
        }
    }
}

/// Persisted outcome of an executed (or attempted) rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_id: RollbackId,
    pub service_name: ServiceName,
    pub triggered_at_ms: u64,
    pub target_revision: Option<RevisionId>,
    pub decision: RollbackDecision,
    pub status: RollbackStatus,
    pub completed_at_ms: Option<u64>,
    pub triggered_by: TriggeredBy,
}

impl RollbackRecord {
    #[must_use]
    pub fn new(
        rollback_id: RollbackId,
        service_name: ServiceName,
        triggered_at_ms: u64,
        decision: RollbackDecision,
        triggered_by: TriggeredBy,
    ) -> Self {
        let target_revision = decision.target_revision.clone();
        Self {
            rollback_id,
            service_name,
            triggered_at_ms,
            target_revision,
            decision,
            status: RollbackStatus::Pending,
            completed_at_ms: None,
            triggered_by,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration of the attempt, when it has completed.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at_ms
            .map(|done| done.saturating_sub(self.triggered_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: RollbackStatus) -> RollbackRecord {
        let mut r = RollbackRecord::new(
            RollbackId::from_seed(7),
            ServiceName::parse("checkout").unwrap(),
            1_000,
            RollbackDecision::rejected("test", 0.0),
            TriggeredBy::Automated,
        );
        r.status = status;
        r
    }

    #[test]
    fn terminal_states_are_exactly_succeeded_failed_skipped() {
        assert!(!RollbackStatus::Pending.is_terminal());
        assert!(!RollbackStatus::InProgress.is_terminal());
        assert!(RollbackStatus::Succeeded.is_terminal());
        assert!(RollbackStatus::Failed.is_terminal());
        assert!(RollbackStatus::Skipped.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RollbackStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn triggered_by_round_trips_wire_form() {
        let auto: TriggeredBy = serde_json::from_str("\"automated\"").unwrap();
        assert_eq!(auto, TriggeredBy::Automated);
        let op: TriggeredBy = serde_json::from_str("\"operator:alice\"").unwrap();
        assert_eq!(op, TriggeredBy::Operator("alice".to_string()));
        assert_eq!(
            serde_json::to_string(&TriggeredBy::Operator("alice".to_string())).unwrap(),
            "\"operator:alice\""
        );
        assert!(serde_json::from_str::<TriggeredBy>("\"operator:\"").is_err());
        assert!(serde_json::from_str::<TriggeredBy>("\"cron\"").is_err());
    }

    #[test]
    fn approved_decision_always_carries_target() {
        let d = RollbackDecision::approved(
            "error budget exhausted",
            0.85,
            RevisionId::parse("stable-v3").unwrap(),
        );
        assert!(d.should_rollback);
        assert_eq!(d.target_revision.unwrap().as_str(), "stable-v3");
    }

    #[test]
    fn duration_is_saturating_and_absent_until_completion() {
        let mut r = record(RollbackStatus::Succeeded);
        assert_eq!(r.duration_ms(), None);
        r.completed_at_ms = Some(4_000);
        assert_eq!(r.duration_ms(), Some(3_000));
        r.completed_at_ms = Some(500);
        assert_eq!(r.duration_ms(), Some(0));
    }
}
