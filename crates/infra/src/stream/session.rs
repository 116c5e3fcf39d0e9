//! Stream sessions: one per connected client.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::Stream;
use shrinkray_events::{RecvError, StreamEvent, Subscription};
use tracing::{debug, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session lifecycle: `Attaching -> Streaming -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; `init` not yet delivered.
    Attaching,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The client fell behind and was dropped. Reconnect to resynchronize.
    #[error("stream session dropped: subscriber buffer overflowed")]
    Overflow,
}

/// A client's view of the event stream: `init` first, then updates in order.
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    state: SessionState,
    init: Option<StreamEvent>,
    subscription: Subscription<StreamEvent>,
}

impl StreamSession {
    pub(crate) fn new(init: StreamEvent, subscription: Subscription<StreamEvent>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: SessionState::Attaching,
            init: Some(init),
            subscription,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Next event, or `Ok(None)` once the session is closed.
    ///
    /// Returns [`SessionError::Overflow`] exactly once if the session was
    /// dropped for falling behind; the session is closed afterwards.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, SessionError> {
        match self.state {
            SessionState::Closed => return Ok(None),
            SessionState::Attaching => {
                self.state = SessionState::Streaming;
                if let Some(init) = self.init.take() {
                    return Ok(Some(init));
                }
            }
            SessionState::Streaming => {}
        }

        match self.subscription.recv().await {
            Ok(event) => Ok(Some(event)),
            Err(RecvError::Overflowed) => {
                warn!(session_id = self.id, "stream session dropped: client too slow");
                self.state = SessionState::Closed;
                Err(SessionError::Overflow)
            }
            Err(RecvError::Closed) => {
                self.state = SessionState::Closed;
                Ok(None)
            }
        }
    }

    /// Detach from the broadcaster. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = self.id, "stream session closed");
            self.state = SessionState::Closed;
            self.init = None;
            self.subscription.close();
        }
    }

    /// Adapt into a stream that ends after the session closes or overflows.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, SessionError>> + Send {
        futures::stream::unfold(Some(self), |session| async move {
            let mut session = session?;
            match session.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(session))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = self.id, "stream session detached");
        }
    }
}
