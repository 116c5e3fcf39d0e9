//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes events to every current subscriber. It is transport for
//! already-committed state, not storage: the job store is the source of truth,
//! and a subscriber that falls behind is cut off rather than buffered without
//! bound. A cut-off subscriber observes [`RecvError::Overflowed`] once it has
//! drained what was already queued, and must resynchronize from a fresh
//! snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// Why a subscription stopped yielding messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The bus dropped this subscriber because its buffer was full.
    #[error("subscriber buffer overflowed")]
    Overflowed,
    /// The bus (or this subscription) was closed.
    #[error("subscription closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("no message available")]
    Empty,
    #[error("subscriber buffer overflowed")]
    Overflowed,
    #[error("subscription closed")]
    Closed,
}

/// Publisher-side half of a subscription, held by bus implementations.
#[derive(Debug)]
pub struct SubscriberHandle<M> {
    sender: mpsc::Sender<M>,
    overflowed: Arc<AtomicBool>,
}

/// Outcome of offering one message to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Buffer full; the subscriber has been marked overflowed and must be removed.
    Overflowed,
    /// Receiver dropped or closed.
    Gone,
}

impl<M> SubscriberHandle<M> {
    /// Offer a message without blocking.
    pub fn offer(&self, message: M) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                Delivery::Overflowed
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A subscription to an event stream.
///
/// Messages are received in the order they were published.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::Receiver<M>,
    overflowed: Arc<AtomicBool>,
}

impl<M> Subscription<M> {
    /// Create a connected pair with a bounded buffer of `capacity` messages.
    pub fn channel(capacity: usize) -> (SubscriberHandle<M>, Subscription<M>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        (
            SubscriberHandle {
                sender,
                overflowed: overflowed.clone(),
            },
            Subscription {
                receiver,
                overflowed,
            },
        )
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<M, RecvError> {
        match self.receiver.recv().await {
            Some(m) => Ok(m),
            None => Err(self.end_reason()),
        }
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        match self.receiver.try_recv() {
            Ok(m) => Ok(m),
            Err(mpsc::error::TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(mpsc::error::TryRecvError::Disconnected) => match self.end_reason() {
                RecvError::Overflowed => Err(TryRecvError::Overflowed),
                RecvError::Closed => Err(TryRecvError::Closed),
            },
        }
    }

    /// Stop accepting messages. Already-buffered messages can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    fn end_reason(&self) -> RecvError {
        if self.has_overflowed() {
            RecvError::Overflowed
        } else {
            RecvError::Closed
        }
    }
}

/// Event bus (pub/sub abstraction) with broadcast semantics.
///
/// `publish` never waits on subscribers, so it is safe to call while holding
/// the lock that orders store mutations.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
