use serde::{Deserialize, Serialize};

use shrinkray_jobs::{Job, JobStats};

/// A frame of the job event stream.
///
/// Every connection receives exactly one `init` first, followed by one
/// `update` per committed store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full snapshot: every job in submission order, regardless of status.
    Init { jobs: Vec<Job>, stats: JobStats },
    /// One changed job plus freshly recomputed stats.
    Update { job: Job, stats: JobStats },
}

impl StreamEvent {
    pub fn init(jobs: Vec<Job>, stats: JobStats) -> Self {
        Self::Init { jobs, stats }
    }

    pub fn update(job: Job, stats: JobStats) -> Self {
        Self::Update { job, stats }
    }

    /// Stable event type identifier (matches the `type` tag on the wire).
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Update { .. } => "update",
        }
    }

    pub fn stats(&self) -> &JobStats {
        match self {
            StreamEvent::Init { stats, .. } | StreamEvent::Update { stats, .. } => stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn init_wire_shape_is_tagged() {
        let job = Job::new("/media/a.mkv", "compress-hevc", Utc::now());
        let stats = JobStats::tally([&job]);
        let json = serde_json::to_value(StreamEvent::init(vec![job], stats)).unwrap();

        assert_eq!(json["type"], "init");
        assert_eq!(json["jobs"].as_array().unwrap().len(), 1);
        assert_eq!(json["stats"]["pending"], 1);
    }

    #[test]
    fn update_parses_from_json() {
        let raw = r#"{"type":"update","job":{"id":"j1","input_path":"/media/a.mkv","preset_id":"compress-hevc","status":"cancelled"},"stats":{"pending":0,"running":0,"complete":0,"failed":0}}"#;
        let ev: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.event_type(), "update");
    }
}
