// --- File: crates/clinic_common/src/http.rs ---
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{ClinicError, HttpStatusCode};

pub mod client;

/// Extension trait for ClinicError to convert it to an Axum HTTP response.
pub trait IntoHttpResponse {
    fn into_http_response(self) -> Response;
}

impl IntoHttpResponse for ClinicError {
    fn into_http_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut error = json!({
            "message": self.to_string(),
            "code": status_code.as_u16(),
            "reason": self.reason(),
            "action": self.operator_action(),
            "retryable": self.is_retryable(),
        });
        if let ClinicError::PartiallyFailed {
            remote_event_id,
            compensated,
            ..
        } = &self
        {
            error["remote_event_id"] = json!(remote_event_id);
            error["compensated"] = json!(compensated);
        }

        (status_code, Json(json!({ "error": error }))).into_response()
    }
}

impl IntoResponse for ClinicError {
    fn into_response(self) -> Response {
        self.into_http_response()
    }
}
