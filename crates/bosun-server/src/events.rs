//! Fan-out of app-list snapshots to open event streams.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Messages a subscriber may lag behind before new ones are dropped for it.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;

/// Subscriber list of bounded channels.
///
/// `broadcast` never blocks: a subscriber whose buffer is full misses that
/// message, and a subscriber whose receiver is gone is removed.
pub struct EventHub {
    subscribers: Mutex<Vec<SyncSender<String>>>,
    capacity: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<SyncSender<String>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Receiver<String> {
        let (tx, rx) = sync_channel(self.capacity);
        self.subscribers().push(tx);
        rx
    }

    /// Offer `message` to every subscriber. Returns how many accepted it.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        self.subscribers().retain(|tx| match tx.try_send(message.to_owned()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if dropped > 0 {
            debug!("event dropped for {dropped} slow subscriber(s)");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_broadcast() {
        let hub = EventHub::new(4);
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.broadcast("apps"), 2);
        assert_eq!(a.try_recv().unwrap(), "apps");
        assert_eq!(b.try_recv().unwrap(), "apps");
    }

    #[test]
    fn full_subscriber_misses_messages_without_blocking_others() {
        let hub = EventHub::new(1);
        let slow = hub.subscribe();
        let fast = hub.subscribe();

        assert_eq!(hub.broadcast("one"), 2);
        assert_eq!(fast.try_recv().unwrap(), "one");
        // `slow` still holds "one"; "two" is dropped for it only.
        assert_eq!(hub.broadcast("two"), 1);
        assert_eq!(fast.try_recv().unwrap(), "two");
        assert_eq!(slow.try_recv().unwrap(), "one");
        assert!(slow.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn disconnected_subscribers_are_removed() {
        let hub = EventHub::default();
        let keep = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(hub.broadcast("x"), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), "x");
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        assert_eq!(EventHub::default().broadcast("x"), 0);
    }
}
