//! Client-side reconciliation of the job stream into display partitions.
//!
//! `QueueView` derives, purely from the events it has seen:
//! - **Active** ("Now Processing"): `running` and `pending_probe` jobs
//! - **Queued** ("Up Next"): `pending` jobs, plus jobs this view saw become
//!   `cancelled` through an update (the latest [`RECENTLY_CANCELLED_LIMIT`]
//!   stay visible after the cancel)

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use shrinkray_core::JobId;
use shrinkray_jobs::{Job, JobStats, JobStatus};

use crate::{Projection, StreamEvent};

/// How many cancellations "Up Next" keeps showing.
pub const RECENTLY_CANCELLED_LIMIT: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct QueueView {
    /// Every known job, in first-seen (submission) order.
    jobs: IndexMap<JobId, Job>,
    status_index: HashMap<JobStatus, HashSet<JobId>>,
    /// Oldest cancellation first.
    recently_cancelled: IndexSet<JobId>,
    stats: JobStats,
}

impl QueueView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Stats as last reported by the server.
    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Jobs currently indexed under `status`, in submission order.
    pub fn jobs_by_status(&self, status: JobStatus) -> Vec<&Job> {
        match self.status_index.get(&status) {
            Some(ids) => self.in_order(ids.iter()),
            None => Vec::new(),
        }
    }

    /// "Now Processing": running and initializing jobs.
    pub fn active(&self) -> Vec<&Job> {
        let ids = [JobStatus::Running, JobStatus::PendingProbe]
            .into_iter()
            .filter_map(|s| self.status_index.get(&s))
            .flatten();
        self.in_order(ids)
    }

    /// "Up Next": pending jobs plus recently cancelled ones.
    pub fn queued(&self) -> Vec<&Job> {
        let pending = self.status_index.get(&JobStatus::Pending).into_iter().flatten();
        self.in_order(pending.chain(self.recently_cancelled.iter()))
    }

    /// Replace the whole read model from a snapshot.
    ///
    /// Every job is indexed in both the id map and the status index,
    /// including jobs that were already running before this view attached.
    fn reset_from_snapshot(&mut self, jobs: &[Job], stats: &JobStats) {
        self.jobs.clear();
        self.status_index.clear();
        self.recently_cancelled.clear();

        for job in jobs {
            self.index(job.clone());
        }
        self.stats = *stats;
    }

    fn upsert(&mut self, job: &Job, stats: &JobStats) {
        let previous = self.jobs.get(&job.id).map(|j| j.status);

        if job.status == JobStatus::Cancelled && previous != Some(JobStatus::Cancelled) {
            self.recently_cancelled.insert(job.id.clone());
            while self.recently_cancelled.len() > RECENTLY_CANCELLED_LIMIT {
                self.recently_cancelled.shift_remove_index(0);
            }
        }
        if let Some(prev) = previous {
            if let Some(ids) = self.status_index.get_mut(&prev) {
                ids.remove(&job.id);
            }
        }

        self.index(job.clone());
        self.stats = *stats;
    }

    fn index(&mut self, job: Job) {
        self.status_index
            .entry(job.status)
            .or_default()
            .insert(job.id.clone());
        self.jobs.insert(job.id.clone(), job);
    }

    fn in_order<'a>(&'a self, ids: impl Iterator<Item = &'a JobId>) -> Vec<&'a Job> {
        let mut found: Vec<(usize, &Job)> = ids
            .filter_map(|id| self.jobs.get_full(id).map(|(pos, _, job)| (pos, job)))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        found.dedup_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, job)| job).collect()
    }
}

impl Projection for QueueView {
    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Init { jobs, stats } => self.reset_from_snapshot(jobs, stats),
            StreamEvent::Update { job, stats } => self.upsert(job, stats),
        }
    }
}
