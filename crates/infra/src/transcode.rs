//! Transcode collaborator seam.
//!
//! The dispatcher never encodes anything itself. It probes the source, picks
//! an encoder plan, and hands the work to a [`Transcoder`], which reports
//! progress through a [`ProgressSink`] until it finishes or is told to stop.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use shrinkray_core::JobId;
use shrinkray_jobs::{Codec, Preset};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("transcode failed: {0}")]
    Failed(String),
    #[error("{0}")]
    CapabilityUnavailable(String),
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },
    #[error("transcode aborted")]
    Aborted,
}

/// Result of inspecting a source before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub size_bytes: u64,
    pub estimated_duration: Duration,
}

/// Which encoder a job will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodePlan {
    pub codec: Codec,
    pub hardware: bool,
}

impl EncodePlan {
    /// Prefer hardware; fall back to software only when allowed.
    pub fn choose(
        codec: Codec,
        hardware_available: bool,
        allow_software_fallback: bool,
    ) -> Result<Self, TranscodeError> {
        if hardware_available {
            return Ok(Self {
                codec,
                hardware: true,
            });
        }
        if allow_software_fallback {
            return Ok(Self {
                codec,
                hardware: false,
            });
        }
        Err(TranscodeError::CapabilityUnavailable(format!(
            "no hardware {codec} encoder available and software fallback is disabled"
        )))
    }

    pub fn is_software_fallback(&self) -> bool {
        !self.hardware
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub job_id: JobId,
    pub input_path: PathBuf,
    pub preset: Preset,
    pub plan: EncodePlan,
    pub estimated_duration: Duration,
}

/// One progress tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Percent complete, 0..=100.
    pub percent: f64,
    /// Encode speed relative to realtime.
    pub speed: f64,
    pub eta: Option<Duration>,
}

/// Whether the transcoder should keep going after a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Abort,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress) -> Checkpoint;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<ProbeReport, TranscodeError>;

    fn hardware_available(&self, codec: Codec) -> bool;

    /// Encode until done. Must return [`TranscodeError::Aborted`] once the
    /// sink answers [`Checkpoint::Abort`].
    async fn run(
        &self,
        request: TranscodeRequest,
        progress: &dyn ProgressSink,
    ) -> Result<(), TranscodeError>;
}

/// Stand-in transcoder that ticks progress over a fixed wall-clock duration.
#[derive(Debug, Clone)]
pub struct SimulatedTranscoder {
    duration: Duration,
    ticks: u32,
    hardware: HashSet<Codec>,
    check_source: bool,
}

impl SimulatedTranscoder {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ticks: 20,
            hardware: HashSet::new(),
            check_source: true,
        }
    }

    pub fn with_hardware(mut self, codecs: impl IntoIterator<Item = Codec>) -> Self {
        self.hardware.extend(codecs);
        self
    }

    pub fn with_ticks(mut self, ticks: u32) -> Self {
        self.ticks = ticks.max(1);
        self
    }

    /// Skip the source existence check (tests, demos).
    pub fn without_source_check(mut self) -> Self {
        self.check_source = false;
        self
    }

    fn speed(plan: &EncodePlan) -> f64 {
        if plan.hardware { 4.0 } else { 0.8 }
    }
}

#[async_trait]
impl Transcoder for SimulatedTranscoder {
    async fn probe(&self, input: &Path) -> Result<ProbeReport, TranscodeError> {
        let size_bytes = if self.check_source {
            let meta = tokio::fs::metadata(input).await.map_err(|e| {
                TranscodeError::SourceUnavailable {
                    path: input.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
            if !meta.is_file() {
                return Err(TranscodeError::SourceUnavailable {
                    path: input.to_path_buf(),
                    reason: "not a regular file".to_string(),
                });
            }
            meta.len()
        } else {
            0
        };

        Ok(ProbeReport {
            size_bytes,
            estimated_duration: self.duration,
        })
    }

    fn hardware_available(&self, codec: Codec) -> bool {
        self.hardware.contains(&codec)
    }

    async fn run(
        &self,
        request: TranscodeRequest,
        progress: &dyn ProgressSink,
    ) -> Result<(), TranscodeError> {
        let step = self.duration / self.ticks;
        let speed = Self::speed(&request.plan);

        for tick in 1..=self.ticks {
            tokio::time::sleep(step).await;
            let percent = f64::from(tick) * 100.0 / f64::from(self.ticks);
            let remaining = step * (self.ticks - tick);
            let report = Progress {
                percent,
                speed,
                eta: Some(remaining),
            };
            if progress.report(report) == Checkpoint::Abort {
                debug!(job_id = %request.job_id, tick, "simulated transcode aborted");
                return Err(TranscodeError::Aborted);
            }
        }

        Ok(())
    }
}
