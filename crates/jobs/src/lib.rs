//! Transcode job domain module.
//!
//! This crate contains the job lifecycle rules, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod eta;
pub mod job;
pub mod preset;
pub mod stats;

pub use job::{Job, JobStatus, JobUpdate};
pub use preset::{BuiltinPresets, Codec, Preset, PresetCatalog};
pub use stats::JobStats;
