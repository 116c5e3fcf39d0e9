use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};

/// Aggregate counters shown alongside every stream event.
///
/// Always produced by [`JobStats::tally`] over the full job set; there is no
/// increment/decrement API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: usize,
    /// Jobs holding a worker slot (`running` and `pending_probe`).
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = JobStats::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::PendingProbe | JobStatus::Running => stats.running += 1,
                JobStatus::Complete => stats.complete += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn tally_counts_each_status() {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::PendingProbe,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];
        let jobs: Vec<Job> = statuses
            .iter()
            .map(|s| {
                let mut job = Job::new("/media/a.mkv", "compress-hevc", Utc::now());
                job.status = *s;
                job
            })
            .collect();

        assert_eq!(
            JobStats::tally(&jobs),
            JobStats {
                pending: 2,
                running: 2,
                complete: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(JobStats::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"pending": 0, "running": 0, "complete": 0, "failed": 0})
        );
    }
}
