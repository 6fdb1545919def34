//! Invalidation subscriber: consumes invalidation batches and evicts cached
//! authorization decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bus::{MessageBus, Subscription};
use crate::invalidation::InvalidationMessage;

/// Cache port: drop every cached decision that depends on the given policies.
///
/// Must be idempotent. Evicting an id that is not cached is a no-op, so
/// duplicate or reordered deliveries are harmless.
pub trait PolicyCacheEvictor: Send + Sync {
    /// Returns the number of cache entries removed.
    fn evict_policies(&self, policy_ids: &[String]) -> usize;
}

impl<T> PolicyCacheEvictor for Arc<T>
where
    T: PolicyCacheEvictor + ?Sized,
{
    fn evict_policies(&self, policy_ids: &[String]) -> usize {
        (**self).evict_policies(policy_ids)
    }
}

/// Counters exposed by a running subscriber.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    messages_received: AtomicU64,
    entries_evicted: AtomicU64,
}

impl SubscriberStats {
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Acquire)
    }

    pub fn entries_evicted(&self) -> u64 {
        self.entries_evicted.load(Ordering::Acquire)
    }
}

/// Handle to control and join a running subscriber.
#[derive(Debug)]
pub struct SubscriberHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<SubscriberStats>,
}

impl SubscriberHandle {
    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }

    /// Request shutdown and wait for the subscriber thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Background consumer of invalidation messages.
#[derive(Debug)]
pub struct InvalidationSubscriber;

impl InvalidationSubscriber {
    /// Subscribe to `bus` and spawn a thread that forwards every batch to `evictor`.
    ///
    /// The subscription is taken before this returns, so messages published
    /// afterwards are never missed.
    pub fn spawn<B, E>(name: &'static str, bus: &B, evictor: E) -> std::io::Result<SubscriberHandle>
    where
        B: MessageBus<InvalidationMessage> + ?Sized,
        E: PolicyCacheEvictor + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();
        let stats = Arc::new(SubscriberStats::default());
        let thread_stats = Arc::clone(&stats);

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || subscriber_loop(name, sub, shutdown_rx, &evictor, &thread_stats))?;

        Ok(SubscriberHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn subscriber_loop<E>(
    name: &'static str,
    sub: Subscription<InvalidationMessage>,
    shutdown_rx: mpsc::Receiver<()>,
    evictor: &E,
    stats: &SubscriberStats,
) where
    E: PolicyCacheEvictor,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(message) => {
                let evicted = evictor.evict_policies(message.policy_ids());
                stats.entries_evicted.fetch_add(evicted as u64, Ordering::AcqRel);
                stats.messages_received.fetch_add(1, Ordering::AcqRel);
                debug!(
                    subscriber = name,
                    policies = message.len(),
                    evicted,
                    "applied policy invalidation batch"
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!(subscriber = name, "invalidation subscription closed");
                break;
            }
        }
    }
}
