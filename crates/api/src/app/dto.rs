use serde::{Deserialize, Serialize};

use shrinkray_jobs::Preset;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub input_path: String,
    pub preset_id: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct PresetResponse {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl From<Preset> for PresetResponse {
    fn from(p: Preset) -> Self {
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
        }
    }
}
