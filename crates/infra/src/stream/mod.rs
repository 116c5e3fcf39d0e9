//! Live job-state streaming: broadcaster fan-out and per-client sessions.

pub mod broadcaster;
pub mod session;

pub use broadcaster::EventBroadcaster;
pub use session::{SessionError, SessionState, StreamSession};
