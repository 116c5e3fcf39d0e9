//! Job record store.
//!
//! The store is the single source of truth for job state. Every mutation is
//! validated against the lifecycle, committed, and handed to the registered
//! observers while the write lock is still held, so observers see commits in
//! exactly the order they happened.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use shrinkray_core::{DomainError, JobId};
use shrinkray_jobs::{Job, JobStats, JobStatus, JobUpdate};

/// Receives every committed job mutation.
///
/// Called with the store's write lock held: implementations must not block
/// and must not call back into the store.
pub trait JobObserver: Send + Sync {
    fn job_changed(&self, job: &Job, stats: &JobStats);
}

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Create a new `pending` job and return its id.
    fn submit(&self, input_path: &str, preset_id: &str) -> Result<JobId, JobStoreError>;

    fn get(&self, job_id: &JobId) -> Result<Job, JobStoreError>;

    /// All jobs in submission order.
    fn list(&self) -> Result<Vec<Job>, JobStoreError>;

    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Move a job along the lifecycle, applying `update` to its fields.
    fn transition(
        &self,
        job_id: &JobId,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, JobStoreError>;

    /// Cancel a non-terminal job and signal any in-flight work to abort.
    fn cancel(&self, job_id: &JobId) -> Result<Job, JobStoreError>;

    /// Move the oldest `pending` job to `pending_probe`.
    ///
    /// `abort` is cancelled if the job is cancelled while it holds a worker.
    fn claim_next(&self, abort: CancellationToken) -> Result<Option<Job>, JobStoreError>;

    /// Run `f` over a consistent view of all jobs. No mutation is committed
    /// (and hence no observer is notified) while `f` runs.
    fn with_snapshot<R>(&self, f: impl FnOnce(&[Job]) -> R) -> Result<R, JobStoreError>
    where
        Self: Sized;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid job update: {0}")]
    Validation(String),
    /// A lock was poisoned by a panicking writer; store contents can no longer be trusted.
    #[error("job store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct Records {
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
    aborts: HashMap<JobId, CancellationToken>,
}

impl Records {
    fn position(&self, job_id: &JobId) -> Result<usize, JobStoreError> {
        self.index
            .get(job_id)
            .copied()
            .ok_or_else(|| JobStoreError::NotFound(job_id.clone()))
    }
}

/// In-memory job store.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<Records>,
    observers: Vec<Arc<dyn JobObserver>>,
}

impl core::fmt::Debug for InMemoryJobStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryJobStore")
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are fixed once the store is shared.
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, JobStoreError> {
        self.records.read().map_err(|_| JobStoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, JobStoreError> {
        self.records.write().map_err(|_| JobStoreError::Poisoned)
    }

    /// Notify observers about the job at `pos`. Must be called with the write guard held.
    fn commit(&self, records: &Records, pos: usize) {
        let stats = JobStats::tally(&records.jobs);
        for observer in &self.observers {
            observer.job_changed(&records.jobs[pos], &stats);
        }
    }

    /// Fire and forget the job's abort token, if a worker holds it.
    fn release_worker(records: &mut Records, job_id: &JobId) {
        if let Some(abort) = records.aborts.remove(job_id) {
            if !abort.is_cancelled() {
                debug!(job_id = %job_id, "signalling in-flight work to abort");
                abort.cancel();
            }
        }
    }

    fn apply(
        records: &mut Records,
        pos: usize,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<(), JobStoreError> {
        let job = &mut records.jobs[pos];
        let from = job.status;
        job.transition(to, update, Utc::now()).map_err(|e| match e {
            DomainError::InvalidTransition { .. } => JobStoreError::InvalidTransition {
                job_id: job.id.clone(),
                from,
                to,
            },
            other => JobStoreError::Validation(other.to_string()),
        })
    }
}

impl JobStore for InMemoryJobStore {
    fn submit(&self, input_path: &str, preset_id: &str) -> Result<JobId, JobStoreError> {
        let mut records = self.write()?;
        let job = Job::new(input_path, preset_id, Utc::now());
        let id = job.id.clone();

        let pos = records.jobs.len();
        records.jobs.push(job);
        records.index.insert(id.clone(), pos);

        info!(job_id = %id, input_path, preset_id, "job submitted");
        self.commit(&records, pos);
        Ok(id)
    }

    fn get(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        let records = self.read()?;
        let pos = records.position(job_id)?;
        Ok(records.jobs[pos].clone())
    }

    fn list(&self) -> Result<Vec<Job>, JobStoreError> {
        Ok(self.read()?.jobs.clone())
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        Ok(JobStats::tally(&self.read()?.jobs))
    }

    fn transition(
        &self,
        job_id: &JobId,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, JobStoreError> {
        let mut records = self.write()?;
        let pos = records.position(job_id)?;
        Self::apply(&mut records, pos, to, update)?;

        if to.is_terminal() {
            Self::release_worker(&mut records, job_id);
        }

        self.commit(&records, pos);
        Ok(records.jobs[pos].clone())
    }

    fn cancel(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        let mut records = self.write()?;
        let pos = records.position(job_id)?;
        let from = records.jobs[pos].status;
        Self::apply(&mut records, pos, JobStatus::Cancelled, JobUpdate::none())?;

        Self::release_worker(&mut records, job_id);

        info!(job_id = %job_id, from = %from, "job cancelled");
        self.commit(&records, pos);
        Ok(records.jobs[pos].clone())
    }

    fn claim_next(&self, abort: CancellationToken) -> Result<Option<Job>, JobStoreError> {
        let mut records = self.write()?;
        let Some(pos) = records
            .jobs
            .iter()
            .position(|j| j.status == JobStatus::Pending)
        else {
            return Ok(None);
        };

        Self::apply(&mut records, pos, JobStatus::PendingProbe, JobUpdate::none())?;
        let id = records.jobs[pos].id.clone();
        records.aborts.insert(id, abort);

        self.commit(&records, pos);
        Ok(Some(records.jobs[pos].clone()))
    }

    fn with_snapshot<R>(&self, f: impl FnOnce(&[Job]) -> R) -> Result<R, JobStoreError> {
        let records = self.read()?;
        Ok(f(&records.jobs))
    }
}

impl JobStore for Arc<InMemoryJobStore> {
    fn submit(&self, input_path: &str, preset_id: &str) -> Result<JobId, JobStoreError> {
        (**self).submit(input_path, preset_id)
    }

    fn get(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        (**self).get(job_id)
    }

    fn list(&self) -> Result<Vec<Job>, JobStoreError> {
        (**self).list()
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }

    fn transition(
        &self,
        job_id: &JobId,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, JobStoreError> {
        (**self).transition(job_id, to, update)
    }

    fn cancel(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        (**self).cancel(job_id)
    }

    fn claim_next(&self, abort: CancellationToken) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(abort)
    }

    fn with_snapshot<R>(&self, f: impl FnOnce(&[Job]) -> R) -> Result<R, JobStoreError> {
        (**self).with_snapshot(f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(JobId, JobStatus, JobStats)>>,
    }

    impl JobObserver for Recorder {
        fn job_changed(&self, job: &Job, stats: &JobStats) {
            self.seen
                .lock()
                .unwrap()
                .push((job.id.clone(), job.status, *stats));
        }
    }

    fn recorded_store() -> (InMemoryJobStore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let store = InMemoryJobStore::new().with_observer(recorder.clone());
        (store, recorder)
    }

    #[test]
    fn submit_creates_pending_job_and_notifies() {
        let (store, recorder) = recorded_store();
        let id = store.submit("/media/a.mkv", "compress-hevc").unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.input_path, "/media/a.mkv");
        assert!(job.created_at.is_some());

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, JobStatus::Pending);
        assert_eq!(seen[0].2.pending, 1);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let missing = JobId::from("nope");
        assert_eq!(
            store.get(&missing),
            Err(JobStoreError::NotFound(missing.clone()))
        );
        assert!(matches!(
            store.cancel(&missing),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn claim_next_is_fifo() {
        let store = InMemoryJobStore::new();
        let a = store.submit("/a.mkv", "compress-hevc").unwrap();
        let b = store.submit("/b.mkv", "compress-hevc").unwrap();

        let first = store.claim_next(CancellationToken::new()).unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(first.status, JobStatus::PendingProbe);

        let second = store.claim_next(CancellationToken::new()).unwrap().unwrap();
        assert_eq!(second.id, b);

        assert!(store.claim_next(CancellationToken::new()).unwrap().is_none());
    }

    #[test]
    fn claim_skips_cancelled_pending_jobs() {
        let store = InMemoryJobStore::new();
        let a = store.submit("/a.mkv", "compress-hevc").unwrap();
        let b = store.submit("/b.mkv", "compress-hevc").unwrap();
        store.cancel(&a).unwrap();

        let claimed = store.claim_next(CancellationToken::new()).unwrap().unwrap();
        assert_eq!(claimed.id, b);
    }

    #[test]
    fn invalid_transition_leaves_job_unchanged_and_silent() {
        let (store, recorder) = recorded_store();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();

        let err = store
            .transition(&id, JobStatus::Complete, JobUpdate::none())
            .unwrap_err();
        assert_eq!(
            err,
            JobStoreError::InvalidTransition {
                job_id: id.clone(),
                from: JobStatus::Pending,
                to: JobStatus::Complete,
            }
        );
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn terminal_jobs_reject_further_mutation() {
        let store = InMemoryJobStore::new();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        store.cancel(&id).unwrap();

        assert!(matches!(
            store.cancel(&id),
            Err(JobStoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.transition(&id, JobStatus::Running, JobUpdate::none()),
            Err(JobStoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_signals_in_flight_token() {
        let store = InMemoryJobStore::new();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        let abort = CancellationToken::new();
        store.claim_next(abort.clone()).unwrap();
        store
            .transition(&id, JobStatus::Running, JobUpdate::progress(10.0, 1.0, None))
            .unwrap();

        assert!(!abort.is_cancelled());
        let job = store.cancel(&id).unwrap();
        assert!(abort.is_cancelled());
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress, None);
    }

    #[test]
    fn terminal_transition_signals_in_flight_token() {
        let store = InMemoryJobStore::new();
        let running = store.submit("/a.mkv", "compress-hevc").unwrap();
        let probing = store.submit("/b.mkv", "compress-hevc").unwrap();

        let running_abort = CancellationToken::new();
        store.claim_next(running_abort.clone()).unwrap();
        store
            .transition(&running, JobStatus::Running, JobUpdate::none())
            .unwrap();
        let probing_abort = CancellationToken::new();
        store.claim_next(probing_abort.clone()).unwrap();

        store
            .transition(&running, JobStatus::Cancelled, JobUpdate::none())
            .unwrap();
        assert!(running_abort.is_cancelled());

        store
            .transition(&probing, JobStatus::Failed, JobUpdate::error("bad source"))
            .unwrap();
        assert!(probing_abort.is_cancelled());
    }

    #[test]
    fn progress_is_recorded_on_running_job() {
        let store = InMemoryJobStore::new();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        store.claim_next(CancellationToken::new()).unwrap();
        store
            .transition(&id, JobStatus::Running, JobUpdate::none())
            .unwrap();
        let job = store
            .transition(
                &id,
                JobStatus::Running,
                JobUpdate::progress(45.5, 2.1, Some(Duration::from_secs(90))),
            )
            .unwrap();

        assert_eq!(job.progress, Some(45.5));
        assert_eq!(job.speed, Some(2.1));
        assert_eq!(job.eta, Some(Duration::from_secs(90)));
        assert!(job.started_at.is_some());
    }

    #[test]
    fn non_finite_progress_is_a_validation_error() {
        let store = InMemoryJobStore::new();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        store.claim_next(CancellationToken::new()).unwrap();

        let err = store
            .transition(
                &id,
                JobStatus::Running,
                JobUpdate::progress(f64::NAN, 1.0, None),
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Validation(_)));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::PendingProbe);
    }

    #[test]
    fn failed_job_carries_error_and_drops_progress() {
        let store = InMemoryJobStore::new();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        store.claim_next(CancellationToken::new()).unwrap();
        store
            .transition(&id, JobStatus::Running, JobUpdate::progress(50.0, 1.0, None))
            .unwrap();

        let job = store
            .transition(&id, JobStatus::Failed, JobUpdate::error("encoder crashed"))
            .unwrap();
        assert_eq!(job.error.as_deref(), Some("encoder crashed"));
        assert_eq!(job.progress, None);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn snapshot_reflects_submission_order() {
        let store = InMemoryJobStore::new();
        let ids: Vec<_> = (0..4)
            .map(|i| store.submit(&format!("/{i}.mkv"), "compress-hevc").unwrap())
            .collect();

        let listed = store
            .with_snapshot(|jobs| jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(listed, ids);
    }

    #[test]
    fn arc_forwards_to_inner_store() {
        let store = InMemoryJobStore::new().arc();
        let id = store.submit("/a.mkv", "compress-hevc").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().pending, 1);
        assert!(JobStore::get(&store, &id).is_ok());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Claim,
        Run(usize),
        Complete(usize),
        Fail(usize),
        Cancel(usize),
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Submit),
            Just(Op::Claim),
            (0usize..8).prop_map(Op::Run),
            (0usize..8).prop_map(Op::Complete),
            (0usize..8).prop_map(Op::Fail),
            (0usize..8).prop_map(Op::Cancel),
        ]
    }

    fn pick(ids: &[JobId], i: usize) -> Option<JobId> {
        ids.get(i % ids.len().max(1)).cloned()
    }

    proptest! {
        #[test]
        fn observed_stats_always_match_a_recount(ops in proptest::collection::vec(any_op(), 1..60)) {
            let (store, recorder) = recorded_store();
            let mut ids: Vec<JobId> = Vec::new();

            for op in ops {
                let _ = match op {
                    Op::Submit => store.submit("/x.mkv", "compress-hevc").map(|id| ids.push(id)),
                    Op::Claim => store.claim_next(CancellationToken::new()).map(|_| ()),
                    Op::Run(i) => match pick(&ids, i) {
                        Some(id) => store.transition(&id, JobStatus::Running, JobUpdate::none()).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Complete(i) => match pick(&ids, i) {
                        Some(id) => store.transition(&id, JobStatus::Complete, JobUpdate::none()).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Fail(i) => match pick(&ids, i) {
                        Some(id) => store.transition(&id, JobStatus::Failed, JobUpdate::error("x")).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Cancel(i) => match pick(&ids, i) {
                        Some(id) => store.cancel(&id).map(|_| ()),
                        None => Ok(()),
                    },
                };

                let recount = JobStats::tally(&store.list().unwrap());
                prop_assert_eq!(store.stats().unwrap(), recount);
                if let Some((_, _, last)) = recorder.seen.lock().unwrap().last() {
                    prop_assert_eq!(*last, recount);
                }
            }
        }
    }
}
