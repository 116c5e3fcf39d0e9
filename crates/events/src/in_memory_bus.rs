//! In-process pub/sub bus with bounded per-subscriber buffers.

use std::sync::Mutex;

use crate::bus::{Delivery, EventBus, SubscriberHandle, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// Default per-subscriber buffer size.
pub const DEFAULT_CAPACITY: usize = 256;

/// In-memory fan-out bus.
///
/// - No IO, publish never blocks
/// - A subscriber whose buffer is full is dropped (not waited on)
/// - Dropped or closed subscribers are pruned on the next publish
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<SubscriberHandle<M>>>,
    capacity: usize,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.retain(|s| !s.is_closed());
                subs.len()
            }
            Err(_) => 0,
        }
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        subs.retain(|sub| match sub.offer(message.clone()) {
            Delivery::Delivered => true,
            Delivery::Overflowed => {
                tracing::warn!(capacity = self.capacity, "dropping slow subscriber");
                false
            }
            Delivery::Gone => false,
        });

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (handle, subscription) = Subscription::channel(self.capacity);

        // If the lock is poisoned, we still return a subscription;
        // it reports `Closed` immediately because the handle is dropped.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(handle);
        }

        subscription
    }
}
