//! Process-local bus: fan-out over std channels.

use std::sync::{Mutex, MutexGuard, mpsc};

use tracing::trace;

use crate::bus::{CloseSignal, MessageBus, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    closed: CloseSignal,
}

/// Bus for single-process deployments and tests.
///
/// Subscriptions that were dropped are forgotten on the next publish,
/// subscribe, or count, whichever comes first.
#[derive(Debug)]
pub struct InMemoryBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriptions that are still open.
    pub fn subscriber_count(&self) -> usize {
        match self.open_subscribers() {
            Ok(subscribers) => subscribers.len(),
            Err(_) => 0,
        }
    }

    fn open_subscribers(&self) -> Result<MutexGuard<'_, Vec<Subscriber<M>>>, InMemoryBusError> {
        let mut subscribers = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        subscribers.retain(|s| !s.closed.is_closed());
        Ok(subscribers)
    }
}

impl<M> Default for InMemoryBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> MessageBus<M> for InMemoryBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subscribers = self.open_subscribers()?;
        subscribers.retain(|s| s.sender.send(message.clone()).is_ok());
        trace!(subscribers = subscribers.len(), "in-memory bus delivered message");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        let subscription = Subscription::new(receiver);

        // On a poisoned lock the subscription is returned but never fed.
        if let Ok(mut subscribers) = self.open_subscribers() {
            subscribers.push(Subscriber {
                sender,
                closed: subscription.close_signal(),
            });
        }
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_a_copy() {
        let bus = InMemoryBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscription_is_forgotten_without_a_publish() {
        let bus = InMemoryBus::<u32>::new();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(1).unwrap();
        assert_eq!(kept.drain(), vec![1]);
    }

    #[test]
    fn publish_with_no_subscribers_succeeds() {
        let bus = InMemoryBus::<u32>::new();
        drop(bus.subscribe());

        assert!(bus.publish(5).is_ok());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn messages_before_subscribe_are_not_replayed() {
        let bus = InMemoryBus::<u32>::new();
        bus.publish(1).unwrap();
        let late = bus.subscribe();
        bus.publish(2).unwrap();

        assert_eq!(late.drain(), vec![2]);
    }
}
