//! Redis pub/sub transport for policy invalidations (optional).
//!
//! Pub/sub is not durable: a process that is disconnected while a message is
//! published misses it, and its cached decisions age out by TTL instead.
//!
//! Each subscription runs one reader thread. The reader wakes every
//! [`READ_TIMEOUT`] to check whether the subscription was dropped, and on a
//! broken connection it resubscribes after a [`ReconnectBackoff`] delay.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use redis::Commands;
use thiserror::Error;
use tracing::{debug, info, warn};

use keystone_events::{CloseSignal, InvalidationMessage, MessageBus, Subscription};

/// How long a reader blocks on the socket before checking for shutdown.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<redis::RedisError> for RedisBusError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

/// Doubling delay between reconnect attempts, capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Called once a subscription is re-established.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Publishes every invalidation batch as JSON on one Redis channel.
#[derive(Debug, Clone)]
pub struct RedisInvalidationBus {
    client: redis::Client,
    channel: String,
    backoff: ReconnectBackoff,
}

impl RedisInvalidationBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            channel: channel.into(),
            backoff: ReconnectBackoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl MessageBus<InvalidationMessage> for RedisInvalidationBus {
    type Error = RedisBusError;

    fn publish(&self, message: InvalidationMessage) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;
        let mut conn = self.client.get_connection()?;
        let receivers: i64 = conn.publish(&self.channel, payload)?;
        debug!(channel = %self.channel, receivers, ids = message.len(), "published invalidation batch to redis");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<InvalidationMessage> {
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(rx);
        let reader = Reader {
            client: self.client.clone(),
            channel: self.channel.clone(),
            tx,
            closed: subscription.close_signal(),
            backoff: self.backoff.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("redis-sub-{}", self.channel))
            .spawn(move || reader.run());
        if let Err(err) = spawned {
            warn!(channel = %self.channel, error = %err, "could not spawn redis subscription reader");
        }
        subscription
    }
}

fn decode_payload(payload: &str) -> Result<InvalidationMessage, serde_json::Error> {
    serde_json::from_str(payload)
}

struct Reader {
    client: redis::Client,
    channel: String,
    tx: mpsc::Sender<InvalidationMessage>,
    closed: CloseSignal,
    backoff: ReconnectBackoff,
}

impl Reader {
    fn run(mut self) {
        while !self.closed.is_closed() {
            match self.pump() {
                Ok(()) => break,
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        channel = %self.channel,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "redis subscription lost"
                    );
                    self.pause(delay);
                }
            }
        }
        debug!(channel = %self.channel, "redis subscription reader stopped");
    }

    /// Forwards messages until the subscriber goes away (`Ok`) or the
    /// connection fails (`Err`).
    fn pump(&mut self) -> redis::RedisResult<()> {
        let mut conn = self.client.get_connection()?;
        conn.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut pubsub = conn.as_pubsub();
        pubsub.subscribe(&self.channel)?;
        self.backoff.reset();
        info!(channel = %self.channel, "redis subscription established");

        loop {
            if self.closed.is_closed() {
                return Ok(());
            }
            let msg = match pubsub.get_message() {
                Ok(msg) => msg,
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(err),
            };
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(channel = %self.channel, error = %err, "ignoring non-text redis payload");
                    continue;
                }
            };
            match decode_payload(&payload) {
                Ok(message) => {
                    if self.tx.send(message).is_err() {
                        return Ok(());
                    }
                }
                Err(err) => warn!(channel = %self.channel, error = %err, "dropping malformed invalidation payload"),
            }
        }
    }

    /// Sleeps for `delay` in `READ_TIMEOUT` slices, returning early on close.
    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.closed.is_closed() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(READ_TIMEOUT));
        }
    }
}
