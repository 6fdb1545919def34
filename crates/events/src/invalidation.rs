//! Policy invalidation publisher.
//!
//! Write paths hand over the identifiers of every authorization policy they
//! mutated. The publisher deduplicates them, cuts them into bounded batches and
//! emits one [`InvalidationMessage`] per batch so that every serving process can
//! evict its cached decisions.
//!
//! Publishing is fire-and-forget. Transport failures are logged and dropped,
//! never retried and never surfaced to the caller: a missed eviction heals when
//! the cached decision's TTL expires.
//!
//! ```text
//!          publish(ids)              flush()
//! Idle ───────────────▶ Batching ───────────▶ Publishing ───▶ Idle
//!                         │  ▲                    (failures are logged,
//!                         └──┘ publish(ids)        nothing is re-queued)
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::MessageBus;

/// Upper bound on identifiers carried by a single message.
pub const MAX_BATCH_SIZE: usize = 200;

/// Default bus subject for invalidation messages.
pub const DEFAULT_SUBJECT: &str = "keystone.policy.invalidated";

/// Wire payload: `{ "policyIds": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    policy_ids: Vec<String>,
}

impl InvalidationMessage {
    pub fn new(policy_ids: Vec<String>) -> Self {
        Self { policy_ids }
    }

    pub fn policy_ids(&self) -> &[String] {
        &self.policy_ids
    }

    pub fn into_policy_ids(self) -> Vec<String> {
        self.policy_ids
    }

    pub fn len(&self) -> usize {
        self.policy_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policy_ids.is_empty()
    }
}

/// Where bus calls are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// A dedicated thread performs bus calls; callers never wait on the transport.
    #[default]
    Background,
    /// Bus calls happen on the calling thread (tests, single-threaded tools).
    Inline,
}

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Bus subject, used for logging and by transports that need a channel name.
    pub subject: String,
    /// Identifiers per message. Publishers clamp it to `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    pub dispatch: DispatchMode,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            batch_size: MAX_BATCH_SIZE,
            dispatch: DispatchMode::Background,
        }
    }
}

impl PublisherConfig {
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Re-apply the batch bound to a config that may have been built as a literal.
    fn clamped(self) -> Self {
        let batch_size = self.batch_size;
        self.with_batch_size(batch_size)
    }
}

/// Observable publisher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Batching,
    Publishing,
}

/// Order-preserving dedup buffer of identifiers not yet emitted.
#[derive(Debug, Default)]
struct PendingIds {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl PendingIds {
    fn push(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.order.push(id);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn take_full_batches(&mut self, size: usize) -> Vec<InvalidationMessage> {
        let size = size.clamp(1, MAX_BATCH_SIZE);
        let mut batches = Vec::new();
        while self.order.len() >= size {
            let rest = self.order.split_off(size);
            let batch = std::mem::replace(&mut self.order, rest);
            for id in &batch {
                self.seen.remove(id);
            }
            batches.push(InvalidationMessage::new(batch));
        }
        batches
    }

    fn take_all(&mut self, size: usize) -> Vec<InvalidationMessage> {
        let mut batches = self.take_full_batches(size);
        if !self.order.is_empty() {
            self.seen.clear();
            batches.push(InvalidationMessage::new(std::mem::take(&mut self.order)));
        }
        batches
    }
}

#[derive(Debug)]
struct Inner {
    pending: PendingIds,
    state: PublisherState,
}

enum Dispatcher<B> {
    Inline(B),
    Background {
        sender: Option<mpsc::Sender<InvalidationMessage>>,
        join: Option<thread::JoinHandle<()>>,
    },
}

/// Deduplicating, batching, fire-and-forget invalidation publisher.
///
/// Safe to share between request threads (`Arc<InvalidationPublisher<_>>`).
/// The dedup buffer is guarded by a mutex that is never held across a bus call.
pub struct InvalidationPublisher<B> {
    config: PublisherConfig,
    inner: Mutex<Inner>,
    dispatcher: Dispatcher<B>,
}

impl<B> core::fmt::Debug for InvalidationPublisher<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InvalidationPublisher")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<B> InvalidationPublisher<B> {
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn state(&self) -> PublisherState {
        self.lock().state
    }

    /// Identifiers accumulated but not yet emitted.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B> InvalidationPublisher<B>
where
    B: MessageBus<InvalidationMessage> + 'static,
{
    /// Create a publisher, spawning the dispatch thread in background mode.
    pub fn new(bus: B, config: PublisherConfig) -> std::io::Result<Self> {
        let config = config.clamped();
        let dispatcher = match config.dispatch {
            DispatchMode::Inline => Dispatcher::Inline(bus),
            DispatchMode::Background => {
                let (tx, rx) = mpsc::channel::<InvalidationMessage>();
                let subject = config.subject.clone();
                let join = thread::Builder::new()
                    .name("policy-invalidation".to_string())
                    .spawn(move || {
                        for message in rx {
                            send_to_bus(&bus, &subject, message);
                        }
                        debug!(subject = %subject, "invalidation dispatch thread stopped");
                    })?;
                Dispatcher::Background {
                    sender: Some(tx),
                    join: Some(join),
                }
            }
        };

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                pending: PendingIds::default(),
                state: PublisherState::Idle,
            }),
            dispatcher,
        })
    }

    /// Create a publisher that performs bus calls on the calling thread.
    pub fn inline(bus: B, config: PublisherConfig) -> Self {
        Self {
            config: config.clamped().with_dispatch(DispatchMode::Inline),
            inner: Mutex::new(Inner {
                pending: PendingIds::default(),
                state: PublisherState::Idle,
            }),
            dispatcher: Dispatcher::Inline(bus),
        }
    }

    /// Accumulate identifiers, emitting every batch that fills up.
    pub fn publish<I, S>(&self, policy_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ready = {
            let mut inner = self.lock();
            for id in policy_ids {
                inner.pending.push(id.into());
            }
            let ready = inner.pending.take_full_batches(self.config.batch_size);
            inner.state = if !ready.is_empty() {
                PublisherState::Publishing
            } else if !inner.pending.is_empty() {
                PublisherState::Batching
            } else {
                PublisherState::Idle
            };
            ready
        };

        if !ready.is_empty() {
            self.emit(ready);
        }
    }

    /// Emit everything still pending, including a final partial batch.
    pub fn flush(&self) {
        let ready = {
            let mut inner = self.lock();
            let ready = inner.pending.take_all(self.config.batch_size);
            if !ready.is_empty() {
                inner.state = PublisherState::Publishing;
            }
            ready
        };

        if !ready.is_empty() {
            self.emit(ready);
        }
    }

    /// Publish and immediately flush: the entry point for write paths.
    ///
    /// Returns as soon as the batches are handed to the dispatcher.
    pub fn publish_policy_invalidations<I, S>(&self, policy_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish(policy_ids);
        self.flush();
    }

    /// Stop the dispatch thread after it has drained queued messages.
    pub fn shutdown(mut self) {
        self.flush();
        if let Dispatcher::Background { sender, join } = &mut self.dispatcher {
            drop(sender.take());
            if let Some(join) = join.take() {
                let _ = join.join();
            }
        }
    }

    fn emit(&self, batches: Vec<InvalidationMessage>) {
        for message in batches {
            match &self.dispatcher {
                Dispatcher::Inline(bus) => send_to_bus(bus, &self.config.subject, message),
                Dispatcher::Background { sender, .. } => {
                    let count = message.len();
                    let delivered = sender.as_ref().is_some_and(|tx| tx.send(message).is_ok());
                    if !delivered {
                        warn!(
                            subject = %self.config.subject,
                            policies = count,
                            "invalidation dispatch thread unavailable; batch dropped"
                        );
                    }
                }
            }
        }

        let mut inner = self.lock();
        inner.state = if !inner.pending.is_empty() {
            PublisherState::Batching
        } else {
            PublisherState::Idle
        };
    }
}

impl<B> Drop for InvalidationPublisher<B> {
    fn drop(&mut self) {
        // Closing the channel lets the dispatch thread drain and exit on its own.
        if let Dispatcher::Background { sender, .. } = &mut self.dispatcher {
            drop(sender.take());
        }
    }
}

fn send_to_bus<B>(bus: &B, subject: &str, message: InvalidationMessage)
where
    B: MessageBus<InvalidationMessage>,
{
    let count = message.len();
    match bus.publish(message) {
        Ok(()) => debug!(subject, policies = count, "published policy invalidation batch"),
        Err(err) => warn!(
            subject,
            policies = count,
            error = ?err,
            "policy invalidation publish failed; cached decisions expire via TTL"
        ),
    }
}
