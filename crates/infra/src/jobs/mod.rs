//! Job record store and worker dispatcher.
//!
//! ## Components
//!
//! - `JobStore`: authoritative job state, lifecycle validation, ordered change notification
//! - `JobObserver`: hook invoked once per committed mutation, in commit order
//! - `Dispatcher`: bounded worker pool that claims pending jobs oldest-first
//! - `QueueSignal`: wakes the dispatcher when a job is submitted

pub mod dispatcher;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, QueueSignal, MAX_WORKERS};
pub use store::{InMemoryJobStore, JobObserver, JobStore, JobStoreError};
