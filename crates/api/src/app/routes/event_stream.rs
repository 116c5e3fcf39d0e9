//! Live job event stream.

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse};

use crate::app::errors;
use crate::app::services::{self, AppServices};

/// GET /api/jobs/stream
///
/// Server-Sent Events. The first frame is always an `init` snapshot of every
/// job; each later frame is an `update` for one changed job. Frames are
/// `data: <json>` with the event kind in the payload's `type` field.
pub async fn stream_jobs(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services::job_sse_stream(&services) {
        Ok(sse) => sse.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
