use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::dto::PresetResponse;
use crate::app::services::AppServices;

/// GET /api/presets
pub async fn list_presets(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let presets: Vec<PresetResponse> = services.presets().into_iter().map(Into::into).collect();
    Json(presets)
}
