//! Event broadcaster.
//!
//! Registered as a [`JobObserver`] on the store, it turns every committed
//! mutation into an `update` event and fans it out to all attached sessions.
//! Because the store notifies under its write lock, publish order is commit
//! order for every subscriber.

use shrinkray_events::{EventBus, InMemoryEventBus, StreamEvent};
use shrinkray_jobs::{Job, JobStats};
use tracing::{debug, error};

use super::session::StreamSession;
use crate::jobs::{JobObserver, JobStore, JobStoreError};

#[derive(Debug)]
pub struct EventBroadcaster {
    bus: InMemoryEventBus<StreamEvent>,
}

impl EventBroadcaster {
    /// `session_buffer` bounds how many undelivered events a session may hold
    /// before it is dropped.
    pub fn new(session_buffer: usize) -> Self {
        Self {
            bus: InMemoryEventBus::with_capacity(session_buffer),
        }
    }

    /// Attach a new session.
    ///
    /// The snapshot is taken and the subscription registered under the
    /// store's read lock, so the session's `init` is exact: every later
    /// commit arrives as an `update`, and no earlier one does.
    pub fn attach<S: JobStore>(&self, store: &S) -> Result<StreamSession, JobStoreError> {
        let session = store.with_snapshot(|jobs| {
            let subscription = self.bus.subscribe();
            let init = StreamEvent::init(jobs.to_vec(), JobStats::tally(jobs));
            StreamSession::new(init, subscription)
        })?;
        debug!(session_id = session.id(), sessions = self.session_count(), "stream session attached");
        Ok(session)
    }

    pub fn session_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    pub fn session_buffer(&self) -> usize {
        self.bus.capacity()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self {
            bus: InMemoryEventBus::new(),
        }
    }
}

impl JobObserver for EventBroadcaster {
    fn job_changed(&self, job: &Job, stats: &JobStats) {
        if let Err(e) = self.bus.publish(StreamEvent::update(job.clone(), *stats)) {
            error!(job_id = %job.id, error = %e, "failed to broadcast job update");
        }
    }
}
