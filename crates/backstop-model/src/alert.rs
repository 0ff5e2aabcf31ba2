use crate::names::{IncidentId, ServiceName, ValidationError};
use serde::{Deserialize, Serialize};

/// One normalized error-budget alert as ingested from the monitoring webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBudgetAlert {
    pub service_name: ServiceName,
    /// Observed error rate over the alerting window, in `[0, 1]`.
    pub error_rate: f64,
    /// Duration the error rate was sustained, in seconds.
    pub window_seconds: u64,
    /// Unix milliseconds when the alert was received.
    pub received_at_ms: u64,
    pub source_incident_id: IncidentId,
}

impl ErrorBudgetAlert {
    pub fn new(
        service_name: ServiceName,
        error_rate: f64,
        window_seconds: u64,
        received_at_ms: u64,
        source_incident_id: IncidentId,
    ) -> Result<Self, ValidationError> {
        if !error_rate.is_finite() {
            return Err(ValidationError("error_rate must be finite".to_string()));
        }
        if !(0.0..=1.0).contains(&error_rate) {
            return Err(ValidationError(format!(
                "error_rate must be within [0, 1], got {error_rate}"
            )));
        }
        Ok(Self {
            service_name,
            error_rate,
            window_seconds,
            received_at_ms,
            source_incident_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> ServiceName {
        ServiceName::parse("checkout").unwrap()
    }

    fn incident() -> IncidentId {
        IncidentId::parse("inc-1").unwrap()
    }

    #[test]
    fn alert_accepts_rates_within_unit_interval() {
        for rate in [0.0, 0.005, 0.025, 1.0] {
            assert!(ErrorBudgetAlert::new(svc(), rate, 300, 0, incident()).is_ok());
        }
    }

    #[test]
    fn alert_rejects_out_of_range_and_non_finite_rates() {
        for rate in [-0.1, 1.01, f64::NAN, f64::INFINITY] {
            assert!(ErrorBudgetAlert::new(svc(), rate, 300, 0, incident()).is_err());
        }
    }
}
