//! Projection runner: enforces snapshot-first ordering on a consumer.

use crate::{Projection, StreamEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// An `update` arrived before any `init`; the read model would be partial.
    #[error("update received before init snapshot")]
    UpdateBeforeInit,
}

/// Runs stream events through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    initialized: bool,
    applied: u64,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            initialized: false,
            applied: 0,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of events applied since construction.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Apply a single event, rejecting updates that precede the snapshot.
    pub fn apply(&mut self, event: &StreamEvent) -> Result<(), ProjectionError> {
        match event {
            StreamEvent::Init { .. } => self.initialized = true,
            StreamEvent::Update { .. } if !self.initialized => {
                return Err(ProjectionError::UpdateBeforeInit);
            }
            StreamEvent::Update { .. } => {}
        }
        self.projection.apply(event);
        self.applied += 1;
        Ok(())
    }

    /// Apply many events in order.
    pub fn run<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a StreamEvent>,
    ) -> Result<(), ProjectionError> {
        for ev in events {
            self.apply(ev)?;
        }
        Ok(())
    }

    /// Mark the stream as interrupted; the next event must be a fresh `init`.
    pub fn reset(&mut self) {
        self.initialized = false;
    }
}
