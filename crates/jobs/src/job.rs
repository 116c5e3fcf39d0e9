use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shrinkray_core::{DomainError, DomainResult, JobId};

/// Lifecycle status of a job.
///
/// ```text
/// pending -> pending_probe -> running -> complete
///    |            |   \          |  \--> failed
///    |            |    \--> failed
///    \------------+--------------+-----> cancelled
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    PendingProbe,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::PendingProbe,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::PendingProbe => "pending_probe",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No further mutation is accepted once a terminal status is reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses that occupy a worker slot ("Now Processing").
    ///
    /// These are also the only statuses where `progress`/`speed`/`eta` are defined.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::PendingProbe | JobStatus::Running)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    ///
    /// Self-edges on active statuses are field updates (progress ticks).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, PendingProbe)
                | (Pending, Cancelled)
                | (PendingProbe, PendingProbe)
                | (PendingProbe, Running)
                | (PendingProbe, Failed)
                | (PendingProbe, Cancelled)
                | (Running, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields that may accompany a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub progress: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    /// A progress tick reported by the transcoder.
    pub fn progress(progress: f64, speed: f64, eta: Option<Duration>) -> Self {
        Self {
            progress: Some(progress),
            speed: Some(speed),
            eta,
            error: None,
        }
    }

    /// Initial estimate computed while probing the source.
    pub fn estimate(eta: Duration) -> Self {
        Self {
            progress: Some(0.0),
            eta: Some(eta),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// One unit of requested transcoding work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input_path: String,
    pub preset_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "crate::eta")]
    pub eta: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a freshly submitted job in `pending`.
    pub fn new(
        input_path: impl Into<String>,
        preset_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            input_path: input_path.into(),
            preset_id: preset_id.into(),
            status: JobStatus::Pending,
            progress: None,
            speed: None,
            eta: None,
            started_at: None,
            error: None,
            created_at: Some(now),
            finished_at: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// File name portion of `input_path`, used for display and notifications.
    pub fn file_name(&self) -> &str {
        self.input_path
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.input_path.as_str())
    }

    /// Apply a status transition together with its accompanying fields.
    ///
    /// On error the job is left untouched.
    pub fn transition(
        &mut self,
        to: JobStatus,
        update: JobUpdate,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        if let Some(p) = update.progress {
            if !p.is_finite() {
                return Err(DomainError::validation("progress must be finite"));
            }
        }
        if let Some(s) = update.speed {
            if !s.is_finite() || s < 0.0 {
                return Err(DomainError::validation("speed must be a non-negative number"));
            }
        }

        if to.is_active() {
            if let Some(p) = update.progress {
                self.progress = Some(p.clamp(0.0, 100.0));
            }
            if update.speed.is_some() {
                self.speed = update.speed;
            }
            if update.eta.is_some() {
                self.eta = update.eta;
            }
        } else {
            self.progress = None;
            self.speed = None;
            self.eta = None;
        }

        if to == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to == JobStatus::Failed {
            self.error = Some(
                update
                    .error
                    .unwrap_or_else(|| "transcode failed".to_string()),
            );
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }

        self.status = to;
        Ok(())
    }
}
