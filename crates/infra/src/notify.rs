//! Completion notifications.
//!
//! A background task attaches a stream session like any other client and
//! pushes one notification per job that finishes after it attached, to every
//! configured [`Notifier`] (ntfy, Pushover).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shrinkray_core::JobId;
use shrinkray_events::StreamEvent;
use shrinkray_jobs::{Job, JobStatus};

use crate::config::{NtfyConfig, PushoverConfig};
use crate::jobs::JobStore;
use crate::stream::{EventBroadcaster, SessionError};

pub const NOTIFICATION_TITLE: &str = "Shrinkray";

pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to build notification client: {0}")]
    Client(String),
    #[error("failed to send notification: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification server returned status {0}")]
    Status(u16),
    #[error("pushover error: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short service name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

fn http_client() -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::Client(e.to_string()))
}

/// ntfy client.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl NtfyNotifier {
    pub fn new(config: &NtfyConfig) -> Result<Self, NotifyError> {
        let client = http_client()?;
        let url = format!(
            "{}/{}",
            config.server_url.trim_end_matches('/'),
            config.topic.trim_start_matches('/')
        );
        Ok(Self {
            client,
            url,
            token: config.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(message.to_string());
        if !title.is_empty() {
            request = request.header("Title", title);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Pushover client.
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: reqwest::Client,
    url: String,
    user_key: String,
    app_token: String,
}

#[derive(Debug, Default, serde::Deserialize)]
struct PushoverReply {
    #[serde(default)]
    errors: Vec<String>,
}

impl PushoverNotifier {
    pub fn new(config: &PushoverConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client()?,
            url: PUSHOVER_API_URL.to_string(),
            user_key: config.user_key.clone(),
            app_token: config.app_token.clone(),
        })
    }

    /// Send to another endpoint instead of the public API.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    fn name(&self) -> &'static str {
        "pushover"
    }

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let form = [
            ("token", self.app_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title),
            ("message", message),
        ];
        let response = self.client.post(&self.url).form(&form).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let reply: PushoverReply = response.json().await.unwrap_or_default();
            if reply.errors.is_empty() {
                return Err(NotifyError::Status(status.as_u16()));
            }
            return Err(NotifyError::Rejected(reply.errors.join(", ")));
        }
        Ok(())
    }
}

/// Notification body for a finished job, or `None` if `job` has not finished
/// in a way worth announcing.
pub fn completion_message(job: &Job) -> Option<String> {
    match job.status {
        JobStatus::Complete => Some(format!("Finished: {}", job.file_name())),
        JobStatus::Failed => Some(match &job.error {
            Some(error) => format!("Failed: {} ({error})", job.file_name()),
            None => format!("Failed: {}", job.file_name()),
        }),
        _ => None,
    }
}

/// Spawn the notification task. It stops when `shutdown` is cancelled.
pub fn spawn_completion_notifier<S>(
    broadcaster: Arc<EventBroadcaster>,
    store: S,
    notifiers: Vec<Arc<dyn Notifier>>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    S: JobStore + 'static,
{
    tokio::spawn(async move {
        let services: Vec<_> = notifiers.iter().map(|n| n.name()).collect();
        info!(?services, "completion notifier started");
        let mut announced: HashSet<JobId> = HashSet::new();

        loop {
            let mut session = match broadcaster.attach(&store) {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "completion notifier failed to attach");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            let resync = loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break false,
                    event = session.next_event() => event,
                };
                match event {
                    Ok(Some(StreamEvent::Init { jobs, .. })) => {
                        // Anything already finished was either announced or predates us.
                        announced.extend(
                            jobs.iter()
                                .filter(|j| j.status.is_terminal())
                                .map(|j| j.id.clone()),
                        );
                    }
                    Ok(Some(StreamEvent::Update { job, .. })) => {
                        let Some(message) = completion_message(&job) else {
                            continue;
                        };
                        if announced.insert(job.id.clone()) {
                            for notifier in &notifiers {
                                let notifier = notifier.clone();
                                let message = message.clone();
                                let job_id = job.id.clone();
                                tokio::spawn(async move {
                                    let service = notifier.name();
                                    match notifier.send(NOTIFICATION_TITLE, &message).await {
                                        Ok(()) => debug!(%job_id, service, "completion notification sent"),
                                        Err(e) => warn!(%job_id, service, error = %e, "completion notification failed"),
                                    }
                                });
                            }
                        }
                    }
                    Ok(None) => break false,
                    Err(SessionError::Overflow) => break true,
                }
            };

            session.close();
            if !resync {
                break;
            }
            warn!("completion notifier fell behind, re-attaching");
        }

        info!("completion notifier stopped");
    })
}
