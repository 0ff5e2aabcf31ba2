#![forbid(unsafe_code)]
//! Backstop model SSOT.
//!
//! Validated identifiers and the alert/decision/record types shared by the
//! decision engine and the server. No I/O, no async; everything here is
//! plain data with parse-time invariants.

mod alert;
mod names;
mod rollback;

pub use alert::ErrorBudgetAlert;
pub use names::{
    parse_incident_id, parse_revision_id, parse_service_name, IncidentId, RevisionId, RollbackId,
    ServiceName, ValidationError, INCIDENT_ID_MAX_LEN, REVISION_MAX_LEN, SERVICE_NAME_MAX_LEN,
};
pub use rollback::{RollbackDecision, RollbackRecord, RollbackStatus, TriggeredBy};

pub const CRATE_NAME: &str = "backstop-model";
