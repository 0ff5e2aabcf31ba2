// SPDX-License-Identifier: Apache-2.0

use crate::{ApiError, ApiErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiErrorMapping {
    pub status_code: u16,
}

#[must_use]
pub fn map_error(error: &ApiError) -> ApiErrorMapping {
    let status_code = match error.code {
        ApiErrorCode::Unauthorized => 401,
        ApiErrorCode::MalformedPayload
        | ApiErrorCode::ValidationFailed
        | ApiErrorCode::InvalidQueryParameter => 400,
        ApiErrorCode::RollbackNotFound => 404,
        ApiErrorCode::NotReady => 503,
        ApiErrorCode::Internal => 500,
    };
    ApiErrorMapping { status_code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boundary_errors_map_to_client_status_codes() {
        assert_eq!(map_error(&ApiError::unauthorized()).status_code, 401);
        assert_eq!(
            map_error(&ApiError::malformed_payload("not json")).status_code,
            400
        );
        assert_eq!(
            map_error(&ApiError::validation_failed(json!([]))).status_code,
            400
        );
        assert_eq!(map_error(&ApiError::rollback_not_found("rb-x")).status_code, 404);
    }
}
