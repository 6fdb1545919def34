//! Infrastructure-backed transports for invalidation messages.
//!
//! The bus abstraction and the in-process bus live in `keystone-events`; this
//! module adds transports that reach other serving processes.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisInvalidationBus};
