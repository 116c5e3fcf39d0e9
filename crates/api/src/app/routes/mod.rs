use axum::{routing::get, Router};

pub mod event_stream;
pub mod jobs;
pub mod presets;
pub mod system;

/// Router for all `/api` endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/api/config", get(system::config))
        .route("/api/presets", get(presets::list_presets))
        .nest("/api/jobs", jobs::router())
}
