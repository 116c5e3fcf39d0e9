//! Configuration loading and representation.
//!
//! Everything is read from `SHRINKRAY_*` environment variables, optionally
//! seeded from a `.env` file.

use std::net::SocketAddr;
use std::path::{Component, PathBuf};
use std::time::Duration;

use serde::Serialize;

use shrinkray_jobs::Codec;

use crate::jobs::{DispatcherConfig, MAX_WORKERS};

pub const DEFAULT_NTFY_SERVER: &str = "https://ntfy.sh";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A submitted input path that escapes the media directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input path {0:?} is outside the media directory")]
pub struct OutsideMediaPath(pub String);

/// Push notifications through an ntfy server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfyConfig {
    pub server_url: String,
    pub topic: String,
    pub token: Option<String>,
}

/// Push notifications through Pushover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushoverConfig {
    pub user_key: String,
    pub app_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub media_path: PathBuf,
    pub workers: usize,
    pub allow_software_fallback: bool,
    pub bind_addr: SocketAddr,
    pub session_buffer: usize,
    /// Codecs with a hardware encoder available.
    pub hardware_encoders: Vec<Codec>,
    pub simulated_job_duration: Duration,
    pub ntfy: Option<NtfyConfig>,
    pub pushover: Option<PushoverConfig>,
}

/// The subset of configuration exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicConfig {
    pub media_path: String,
    pub workers: usize,
    pub allow_software_fallback: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media_path: PathBuf::from("/media"),
            workers: 1,
            allow_software_fallback: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session_buffer: shrinkray_events::in_memory_bus::DEFAULT_CAPACITY,
            hardware_encoders: Vec::new(),
            simulated_job_duration: Duration::from_secs(20),
            ntfy: None,
            pushover: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, after applying `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let media_path = get("SHRINKRAY_MEDIA_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.media_path);

        let workers = match get("SHRINKRAY_WORKERS") {
            Some(v) => parse_bounded("SHRINKRAY_WORKERS", &v, MAX_WORKERS)?,
            None => defaults.workers,
        };

        let allow_software_fallback = match get("SHRINKRAY_ALLOW_SOFTWARE_FALLBACK") {
            Some(v) => parse_bool("SHRINKRAY_ALLOW_SOFTWARE_FALLBACK", &v)?,
            None => defaults.allow_software_fallback,
        };

        let bind_addr = match get("SHRINKRAY_BIND_ADDR") {
            Some(v) => v.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::invalid("SHRINKRAY_BIND_ADDR", &v, e.to_string())
            })?,
            None => defaults.bind_addr,
        };

        let session_buffer = match get("SHRINKRAY_SESSION_BUFFER") {
            Some(v) => parse_positive("SHRINKRAY_SESSION_BUFFER", &v)?,
            None => defaults.session_buffer,
        };

        let hardware_encoders = match get("SHRINKRAY_HW_ENCODERS") {
            Some(v) => parse_codecs("SHRINKRAY_HW_ENCODERS", &v)?,
            None => defaults.hardware_encoders,
        };

        let simulated_job_duration = match get("SHRINKRAY_SIMULATED_JOB_SECS") {
            Some(v) => {
                let secs: u64 = v.trim().parse().map_err(|_| {
                    ConfigError::invalid("SHRINKRAY_SIMULATED_JOB_SECS", &v, "expected seconds")
                })?;
                Duration::from_secs(secs)
            }
            None => defaults.simulated_job_duration,
        };

        let ntfy = get("SHRINKRAY_NTFY_TOPIC").map(|topic| NtfyConfig {
            server_url: get("SHRINKRAY_NTFY_SERVER")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_NTFY_SERVER.to_string()),
            topic: topic.trim().to_string(),
            token: get("SHRINKRAY_NTFY_TOKEN"),
        });

        // Both credentials are required.
        let pushover = match (
            get("SHRINKRAY_PUSHOVER_USER_KEY"),
            get("SHRINKRAY_PUSHOVER_APP_TOKEN"),
        ) {
            (Some(user_key), Some(app_token)) => Some(PushoverConfig {
                user_key: user_key.trim().to_string(),
                app_token: app_token.trim().to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            media_path,
            workers,
            allow_software_fallback,
            bind_addr,
            session_buffer,
            hardware_encoders,
            simulated_job_duration,
            ntfy,
            pushover,
        })
    }

    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            media_path: self.media_path.display().to_string(),
            workers: self.workers,
            allow_software_fallback: self.allow_software_fallback,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_workers(self.workers)
            .with_software_fallback(self.allow_software_fallback)
    }

    /// Resolve a submitted path: relative paths live under `media_path`.
    ///
    /// `..` segments are folded lexically (symlinks are not followed) and the
    /// result must stay inside `media_path`.
    pub fn resolve_input(&self, input_path: &str) -> Result<PathBuf, OutsideMediaPath> {
        let joined = self.media_path.join(input_path);
        let mut resolved = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(OutsideMediaPath(input_path.to_string()));
                    }
                }
                other => resolved.push(other),
            }
        }
        if resolved.starts_with(&self.media_path) && resolved != self.media_path {
            Ok(resolved)
        } else {
            Err(OutsideMediaPath(input_path.to_string()))
        }
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        Ok(_) => Err(ConfigError::invalid(key, value, "must be at least 1")),
        Err(_) => Err(ConfigError::invalid(key, value, "expected a positive integer")),
    }
}

fn parse_bounded(key: &'static str, value: &str, max: usize) -> Result<usize, ConfigError> {
    let n = parse_positive(key, value)?;
    if n > max {
        return Err(ConfigError::invalid(key, value, format!("must be at most {max}")));
    }
    Ok(n)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

fn parse_codecs(key: &'static str, value: &str) -> Result<Vec<Codec>, ConfigError> {
    let mut codecs = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let codec: Codec = part
            .parse()
            .map_err(|e: shrinkray_core::DomainError| ConfigError::invalid(key, value, e.to_string()))?;
        if !codecs.contains(&codec) {
            codecs.push(codec);
        }
    }
    Ok(codecs)
}
