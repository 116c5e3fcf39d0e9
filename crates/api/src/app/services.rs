use std::{future::Future, sync::Arc, sync::Mutex, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shrinkray_core::JobId;
use shrinkray_jobs::{BuiltinPresets, Job, Preset, PresetCatalog};
use shrinkray_infra::{
    config::AppConfig,
    jobs::{Dispatcher, DispatcherHandle, InMemoryJobStore, JobStore, JobStoreError, QueueSignal},
    notify::{spawn_completion_notifier, Notifier, NtfyNotifier, PushoverNotifier},
    stream::EventBroadcaster,
    transcode::{SimulatedTranscoder, Transcoder},
};

/// Why a submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Everything the HTTP layer talks to.
pub struct AppServices {
    config: AppConfig,
    store: Arc<InMemoryJobStore>,
    broadcaster: Arc<EventBroadcaster>,
    presets: Arc<dyn PresetCatalog>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

/// The transcoder the binary runs with, derived from configuration.
pub fn default_transcoder(config: &AppConfig) -> Arc<dyn Transcoder> {
    Arc::new(
        SimulatedTranscoder::new(config.simulated_job_duration)
            .with_hardware(config.hardware_encoders.iter().copied()),
    )
}

/// Wire store, broadcaster, dispatcher and notifier. Must run inside a tokio runtime.
pub fn build_services(config: AppConfig, transcoder: Arc<dyn Transcoder>) -> AppServices {
    let signal = Arc::new(QueueSignal::new());
    let broadcaster = Arc::new(EventBroadcaster::new(config.session_buffer));
    let store = InMemoryJobStore::new()
        .with_observer(broadcaster.clone())
        .with_observer(signal.clone())
        .arc();
    let presets: Arc<dyn PresetCatalog> = Arc::new(BuiltinPresets::default());
    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        store.clone(),
        transcoder,
        presets.clone(),
        signal,
        config.dispatcher_config(),
    )
    .spawn();

    let notifier = spawn_notifier(&config, &broadcaster, &store, &shutdown);

    info!(
        media_path = %config.media_path.display(),
        workers = config.workers,
        allow_software_fallback = config.allow_software_fallback,
        "services ready"
    );

    AppServices {
        config,
        store,
        broadcaster,
        presets,
        shutdown,
        dispatcher: Mutex::new(Some(dispatcher)),
        notifier: Mutex::new(notifier),
    }
}

fn spawn_notifier(
    config: &AppConfig,
    broadcaster: &Arc<EventBroadcaster>,
    store: &Arc<InMemoryJobStore>,
    shutdown: &CancellationToken,
) -> Option<JoinHandle<()>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if let Some(ntfy) = &config.ntfy {
        match NtfyNotifier::new(ntfy) {
            Ok(client) => {
                info!(url = client.url(), "ntfy notifications enabled");
                notifiers.push(Arc::new(client));
            }
            Err(e) => warn!(error = %e, "ntfy notifications disabled"),
        }
    }
    if let Some(pushover) = &config.pushover {
        match PushoverNotifier::new(pushover) {
            Ok(client) => {
                info!("pushover notifications enabled");
                notifiers.push(Arc::new(client));
            }
            Err(e) => warn!(error = %e, "pushover notifications disabled"),
        }
    }

    if notifiers.is_empty() {
        return None;
    }
    Some(spawn_completion_notifier(
        broadcaster.clone(),
        store.clone(),
        notifiers,
        shutdown.child_token(),
    ))
}

impl AppServices {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemoryJobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.presets.list()
    }

    pub fn submit(&self, input_path: &str, preset_id: &str) -> Result<JobId, SubmitError> {
        if input_path.trim().is_empty() {
            return Err(SubmitError::Validation("input_path must not be empty".to_string()));
        }
        if self.presets.get(preset_id).is_none() {
            return Err(SubmitError::UnknownPreset(preset_id.to_string()));
        }
        let resolved = self
            .config
            .resolve_input(input_path.trim())
            .map_err(|e| SubmitError::Validation(e.to_string()))?;
        Ok(self.store.submit(&resolved.to_string_lossy(), preset_id)?)
    }

    pub fn jobs(&self) -> Result<Vec<Job>, JobStoreError> {
        self.store.list()
    }

    pub fn job(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.store.get(id)
    }

    pub fn cancel(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.store.cancel(id)
    }

    /// Resolves when shutdown has been requested.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static + use<> {
        self.shutdown.clone().cancelled_owned()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop background work: end streams, cancel in-flight jobs, wait for workers.
    pub async fn shutdown(&self) {
        self.request_shutdown();

        let dispatcher = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown().await;
        }

        let notifier = self.notifier.lock().ok().and_then(|mut n| n.take());
        if let Some(notifier) = notifier {
            if let Err(e) = notifier.await {
                warn!(error = %e, "completion notifier task failed");
            }
        }
    }
}

/// SSE stream of job events: one `init` frame, then `update` frames.
///
/// The stream ends when the session overflows (the client reconnects and
/// gets a fresh `init`) or when the server shuts down.
pub fn job_sse_stream(
    services: &AppServices,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, axum::Error>> + use<>>, JobStoreError> {
    let session = services.broadcaster.attach(&services.store)?;
    let session_id = session.id();
    debug!(session_id, "event stream opened");

    let events = session.into_stream().filter_map(move |item| match item {
        Ok(event) => Some(SseEvent::default().json_data(event)),
        Err(e) => {
            warn!(session_id, error = %e, "closing event stream");
            None
        }
    });
    let stream = futures::StreamExt::take_until(events, services.shutdown_requested());

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
