use core::str::FromStr;

use serde::{Deserialize, Serialize};

use shrinkray_core::DomainError;

/// Target video codec of a preset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Hevc,
    Av1,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
        }
    }
}

impl core::fmt::Display for Codec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hevc" | "h265" | "x265" => Ok(Codec::Hevc),
            "av1" => Ok(Codec::Av1),
            other => Err(DomainError::validation(format!("unknown codec: {other}"))),
        }
    }
}

/// Named transcode configuration referenced by jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub codec: Codec,
}

/// Read access to the preset catalog.
pub trait PresetCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<Preset>;

    fn list(&self) -> Vec<Preset>;
}

/// Presets compiled into the binary.
#[derive(Debug, Clone)]
pub struct BuiltinPresets {
    presets: Vec<Preset>,
}

impl BuiltinPresets {
    pub fn new(presets: Vec<Preset>) -> Self {
        Self { presets }
    }
}

impl Default for BuiltinPresets {
    fn default() -> Self {
        Self::new(vec![
            Preset {
                id: "compress-hevc".to_string(),
                name: "Smaller files — HEVC".to_string(),
                description: "Widely compatible".to_string(),
                codec: Codec::Hevc,
            },
            Preset {
                id: "compress-av1".to_string(),
                name: "Smaller files — AV1".to_string(),
                description: "Best quality".to_string(),
                codec: Codec::Av1,
            },
        ])
    }
}

impl PresetCatalog for BuiltinPresets {
    fn get(&self, id: &str) -> Option<Preset> {
        self.presets.iter().find(|p| p.id == id).cloned()
    }

    fn list(&self) -> Vec<Preset> {
        self.presets.clone()
    }
}
