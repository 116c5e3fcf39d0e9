use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shrinkray_infra::jobs::JobStoreError;

use crate::app::services::SubmitError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job not found: {id}"))
        }
        e @ JobStoreError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        JobStoreError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        e @ JobStoreError::Poisoned => {
            tracing::error!(error = %e, "job store unavailable");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        e @ SubmitError::UnknownPreset(_) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_preset", e.to_string())
        }
        SubmitError::Store(e) => store_error_to_response(e),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
