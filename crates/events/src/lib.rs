//! `keystone-events` — message bus mechanics and policy-invalidation propagation.

pub mod bus;
pub mod in_memory_bus;
pub mod invalidation;
pub mod subscriber;

pub use bus::{CloseSignal, MessageBus, Subscription};
pub use in_memory_bus::{InMemoryBus, InMemoryBusError};
pub use invalidation::{
    DEFAULT_SUBJECT, DispatchMode, InvalidationMessage, InvalidationPublisher, MAX_BATCH_SIZE,
    PublisherConfig, PublisherState,
};
pub use subscriber::{InvalidationSubscriber, PolicyCacheEvictor, SubscriberHandle, SubscriberStats};
