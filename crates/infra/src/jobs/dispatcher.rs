//! Worker dispatcher: runs at most `workers` jobs at a time, oldest first.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use shrinkray_core::JobId;
use shrinkray_jobs::{Job, JobStats, JobStatus, JobUpdate, PresetCatalog};

use super::store::{JobObserver, JobStore, JobStoreError};
use crate::transcode::{
    Checkpoint, EncodePlan, Progress, ProgressSink, TranscodeError, TranscodeRequest, Transcoder,
};

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 64;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrent jobs, between 1 and [`MAX_WORKERS`].
    pub workers: usize,
    pub allow_software_fallback: bool,
    /// Backstop re-check of the queue when no wakeup arrives.
    pub poll_interval: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            allow_software_fallback: false,
            poll_interval: Duration::from_millis(500),
            name: "job-dispatcher".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_software_fallback(mut self, allow: bool) -> Self {
        self.allow_software_fallback = allow;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Wakes the dispatcher when a job enters `pending`.
///
/// Register it on the store with [`InMemoryJobStore::with_observer`](super::InMemoryJobStore::with_observer).
#[derive(Debug, Default)]
pub struct QueueSignal {
    notify: Notify,
}

impl QueueSignal {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

impl JobObserver for QueueSignal {
    fn job_changed(&self, job: &Job, _stats: &JobStats) {
        if job.status == JobStatus::Pending {
            self.notify.notify_one();
        }
    }
}

/// Handle to a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop claiming jobs, cancel in-flight work and wait for every worker to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "dispatcher task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Pulls pending jobs from the store and drives them through the transcoder.
pub struct Dispatcher<S: JobStore> {
    store: S,
    transcoder: Arc<dyn Transcoder>,
    presets: Arc<dyn PresetCatalog>,
    signal: Arc<QueueSignal>,
    config: DispatcherConfig,
}

impl<S> Dispatcher<S>
where
    S: JobStore + Clone + 'static,
{
    pub fn new(
        store: S,
        transcoder: Arc<dyn Transcoder>,
        presets: Arc<dyn PresetCatalog>,
        signal: Arc<QueueSignal>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            transcoder,
            presets,
            signal,
            config,
        }
    }

    /// Spawn the dispatch loop on the current tokio runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.run(shutdown.clone()));
        DispatcherHandle { shutdown, join }
    }

    async fn run(self, shutdown: CancellationToken) {
        let workers = self.config.workers.clamp(1, MAX_WORKERS);
        info!(dispatcher = %self.config.name, workers, "job dispatcher started");

        let slots = Arc::new(Semaphore::new(workers));

        'dispatch: loop {
            // A slot is reserved before a job is claimed, so a saturated pool
            // never moves another job out of `pending`.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (job, abort) = loop {
                let abort = shutdown.child_token();
                match self.store.claim_next(abort.clone()) {
                    Ok(Some(job)) => break (job, abort),
                    Ok(None) => {}
                    Err(e) => error!(dispatcher = %self.config.name, error = %e, "failed to claim job"),
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break 'dispatch,
                    _ = self.signal.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            };

            info!(dispatcher = %self.config.name, job_id = %job.id, input_path = %job.input_path, "claimed job");

            let worker = Worker {
                store: self.store.clone(),
                transcoder: self.transcoder.clone(),
                presets: self.presets.clone(),
                allow_software_fallback: self.config.allow_software_fallback,
            };
            tokio::spawn(async move {
                worker.run(job, abort).await;
                drop(permit);
            });
        }

        // Every worker holds a permit until it has recorded its job's outcome.
        match u32::try_from(workers) {
            Ok(all) => {
                let _ = slots.acquire_many(all).await;
            }
            Err(e) => error!(dispatcher = %self.config.name, error = %e, "cannot wait for workers"),
        }
        info!(dispatcher = %self.config.name, "job dispatcher stopped");
    }
}

struct Worker<S> {
    store: S,
    transcoder: Arc<dyn Transcoder>,
    presets: Arc<dyn PresetCatalog>,
    allow_software_fallback: bool,
}

impl<S: JobStore + Clone + 'static> Worker<S> {
    async fn run(&self, job: Job, abort: CancellationToken) {
        let id = job.id.clone();

        match self.execute(&job, &abort).await {
            Ok(()) => match self.store.transition(&id, JobStatus::Complete, JobUpdate::none()) {
                Ok(_) => info!(job_id = %id, "job completed"),
                Err(e) => debug!(job_id = %id, error = %e, "completion not recorded"),
            },
            Err(TranscodeError::Aborted) => self.settle_aborted(&id),
            Err(_) if abort.is_cancelled() => self.settle_aborted(&id),
            Err(e) => {
                warn!(job_id = %id, error = %e, "job failed");
                if let Err(e) =
                    self.store
                        .transition(&id, JobStatus::Failed, JobUpdate::error(e.to_string()))
                {
                    debug!(job_id = %id, error = %e, "failure not recorded");
                }
            }
        }
    }

    async fn execute(&self, job: &Job, abort: &CancellationToken) -> Result<(), TranscodeError> {
        let preset = self.presets.get(&job.preset_id).ok_or_else(|| {
            TranscodeError::Failed(format!("unknown preset: {}", job.preset_id))
        })?;

        let input = Path::new(&job.input_path);
        let report = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TranscodeError::Aborted),
            report = self.transcoder.probe(input) => report?,
        };

        let plan = EncodePlan::choose(
            preset.codec,
            self.transcoder.hardware_available(preset.codec),
            self.allow_software_fallback,
        )?;
        if plan.is_software_fallback() {
            warn!(job_id = %job.id, codec = %plan.codec, "no hardware encoder, using software fallback");
        }

        self.record(
            &job.id,
            JobStatus::PendingProbe,
            JobUpdate::estimate(report.estimated_duration),
            abort,
        )?;
        self.record(
            &job.id,
            JobStatus::Running,
            JobUpdate::progress(0.0, 0.0, Some(report.estimated_duration)),
            abort,
        )?;
        info!(job_id = %job.id, preset_id = %preset.id, hardware = plan.hardware, "job started");

        let request = TranscodeRequest {
            job_id: job.id.clone(),
            input_path: input.to_path_buf(),
            preset,
            plan,
            estimated_duration: report.estimated_duration,
        };
        let sink = StoreProgress {
            store: &self.store,
            job_id: &job.id,
            abort,
        };

        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(TranscodeError::Aborted),
            result = self.transcoder.run(request, &sink) => result,
        }
    }

    fn record(
        &self,
        job_id: &JobId,
        to: JobStatus,
        update: JobUpdate,
        abort: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        match self.store.transition(job_id, to, update) {
            Ok(_) => Ok(()),
            Err(_) if abort.is_cancelled() => Err(TranscodeError::Aborted),
            Err(JobStoreError::InvalidTransition { .. }) => Err(TranscodeError::Aborted),
            Err(e) => Err(TranscodeError::Failed(e.to_string())),
        }
    }

    /// The job stopped because it was cancelled or the dispatcher is shutting down.
    fn settle_aborted(&self, job_id: &JobId) {
        match self.store.cancel(job_id) {
            Ok(_) => info!(job_id = %job_id, "in-flight job cancelled on shutdown"),
            Err(JobStoreError::InvalidTransition { .. }) => {
                debug!(job_id = %job_id, "job already settled");
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to settle aborted job"),
        }
    }
}

/// Writes transcoder progress to the store and answers with the cancel state.
struct StoreProgress<'a, S> {
    store: &'a S,
    job_id: &'a JobId,
    abort: &'a CancellationToken,
}

impl<S: JobStore> ProgressSink for StoreProgress<'_, S> {
    fn report(&self, progress: Progress) -> Checkpoint {
        if self.abort.is_cancelled() {
            return Checkpoint::Abort;
        }
        let update = JobUpdate::progress(progress.percent, progress.speed, progress.eta);
        match self.store.transition(self.job_id, JobStatus::Running, update) {
            Ok(_) => Checkpoint::Continue,
            Err(JobStoreError::Validation(reason)) => {
                debug!(job_id = %self.job_id, reason, "dropping malformed progress tick");
                Checkpoint::Continue
            }
            Err(_) => Checkpoint::Abort,
        }
    }
}
