//! Job stream events: construction, fan-out transport, and client-side projection.

pub mod bus;
pub mod event;
pub mod frame;
pub mod in_memory_bus;
pub mod projection;
pub mod reconciler;
pub mod runner;

pub use bus::{EventBus, RecvError, Subscription, TryRecvError};
pub use event::StreamEvent;
pub use frame::{FrameDecoder, FrameError};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use reconciler::QueueView;
pub use runner::{ProjectionError, ProjectionRunner};
