//! Typed Event Bus
//!
//! Fan-out of observations to any number of independent subscribers.
//! Each subscriber owns an unbounded channel, so a slow or dropped
//! subscriber never blocks the publisher or the other subscribers, and
//! nothing is silently lost the way a lagging broadcast receiver would be.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Publish/subscribe hub for one event type.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    /// Register a subscriber. Events published from now on are delivered to it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber; dropped receivers are pruned.
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subs = self.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        subs.len()
    }

    /// Live subscriber count (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
