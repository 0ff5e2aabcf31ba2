#![forbid(unsafe_code)]

mod convert;
mod dto;
mod error_mapping;
mod errors;

pub use convert::{alert_from_envelope, record_dto};
pub use dto::{
    ConditionDto, IncidentDto, MetricsSummaryDto, ResourceDto, RollbackRecordDto, WebhookAck,
    WebhookEnvelope,
};
pub use error_mapping::{map_error, ApiErrorMapping};
pub use errors::{ApiError, ApiErrorCode};

pub const CRATE_NAME: &str = "backstop-api";
pub const API_VERSION: &str = "v1";
