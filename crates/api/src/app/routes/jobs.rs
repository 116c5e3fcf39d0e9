use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use shrinkray_core::JobId;

use crate::app::routes::event_stream;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/stream", get(event_stream::stream_jobs))
        .route("/:id", get(get_job))
        .route("/:id/cancel", post(cancel_job))
}

fn parse_id(id: &str) -> Result<JobId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

/// POST /api/jobs
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    match services.submit(&body.input_path, &body.preset_id) {
        Ok(id) => (
            StatusCode::CREATED,
            Json(dto::SubmitJobResponse { id: id.to_string() }),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// GET /api/jobs: every job in submission order.
pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.jobs() {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /api/jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.job(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.cancel(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
