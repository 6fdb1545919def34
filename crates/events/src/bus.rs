//! Fan-out of invalidation traffic between serving processes.
//!
//! A [`MessageBus`] delivers every published message to every open
//! [`Subscription`]. Delivery is best-effort: a message can arrive twice or
//! not at all, and messages from different publishers interleave freely. None
//! of that affects correctness because the policy store stays authoritative;
//! a lost invalidation only means a cached decision lives until its TTL.
//!
//! Transports that pump messages from a background producer hold the
//! subscription's [`CloseSignal`] and stop once the consumer has gone away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Raised when the owning [`Subscription`] is dropped.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
}

impl CloseSignal {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Receiving end of a bus subscription, consumed by one thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(message) => evict(message),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    closed: CloseSignal,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            closed: CloseSignal::default(),
        }
    }

    /// Handle for the producing side; reports closed once `self` is dropped.
    pub fn close_signal(&self) -> CloseSignal {
        self.closed.clone()
    }

    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything already queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.closed.close();
    }
}

/// Broadcast transport for one message type.
///
/// Many request threads publish concurrently. A failed `publish` is reported
/// but never fatal to the caller's write;
/// [`InvalidationPublisher`](crate::InvalidationPublisher) logs and drops it.
pub trait MessageBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
