use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const SERVICE_NAME_MAX_LEN: usize = 128;
pub const REVISION_MAX_LEN: usize = 128;
pub const INCIDENT_ID_MAX_LEN: usize = 256;

pub fn parse_service_name(input: &str) -> Result<ServiceName, ValidationError> {
    ServiceName::parse(input)
}

pub fn parse_revision_id(input: &str) -> Result<RevisionId, ValidationError> {
    RevisionId::parse(input)
}

pub fn parse_incident_id(input: &str) -> Result<IncidentId, ValidationError> {
    IncidentId::parse(input)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct ServiceName(String);

impl ServiceName {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("service name must not be empty".to_string()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ValidationError(
                "service name must be alphanumeric with '-', '_' or '.'".to_string(),
            ));
        }
        if s.len() > SERVICE_NAME_MAX_LEN {
            return Err(ValidationError(format!(
                "service name exceeds max length {SERVICE_NAME_MAX_LEN}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct RevisionId(String);

impl RevisionId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("revision must not be empty".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError(
                "revision must be printable ascii without whitespace".to_string(),
            ));
        }
        if s.len() > REVISION_MAX_LEN {
            return Err(ValidationError(format!(
                "revision exceeds max length {REVISION_MAX_LEN}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for RevisionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External correlation id from the monitoring system; the idempotency key
/// for webhook deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct IncidentId(String);

impl IncidentId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("incident id must not be empty".to_string()));
        }
        if s.len() > INCIDENT_ID_MAX_LEN {
            return Err(ValidationError(format!(
                "incident id exceeds max length {INCIDENT_ID_MAX_LEN}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IncidentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier minted by the server for each rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct RollbackId(String);

impl RollbackId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("rollback id must not be empty".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError(
                "rollback id must be printable ascii without whitespace".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self(format!("rb-{seed:016x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RollbackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
