//! Runtime layer: job store, dispatcher, transcoder seam, live streaming,
//! configuration and notifications.

pub mod config;
pub mod jobs;
pub mod notify;
pub mod stream;
pub mod transcode;


pub use config::{
    AppConfig, ConfigError, NtfyConfig, OutsideMediaPath, PublicConfig, PushoverConfig,
};
pub use jobs::{
    Dispatcher, DispatcherConfig, DispatcherHandle, InMemoryJobStore, JobObserver, JobStore,
    JobStoreError, QueueSignal,
};
pub use stream::{EventBroadcaster, SessionError, SessionState, StreamSession};
pub use transcode::{SimulatedTranscoder, TranscodeError, Transcoder};
