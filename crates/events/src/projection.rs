use crate::StreamEvent;

/// A projection builds a read model from the job event stream.
///
/// ## Snapshot then deltas
///
/// An `init` event carries the complete job set and must *replace* the read
/// model: every job in it is indexed, whatever its status. `update` events
/// then patch one job at a time.
///
/// ## Idempotency
///
/// Projections must be **idempotent**: applying the same `update` twice must
/// leave the read model unchanged. Applying "latest known state per job id"
/// satisfies this naturally.
///
/// ## Disposability
///
/// Read models are disposable. After a dropped connection the consumer
/// re-attaches, receives a fresh `init`, and rebuilds from it; no replay of
/// missed updates exists.
pub trait Projection {
    /// Apply a single event to the projection, updating the read model.
    fn apply(&mut self, event: &StreamEvent);
}
