//! Multicast streams for events with no one-to-one correlation
//!
//! Two flavors: [`EventBus`] is pure multicast with no replay for late
//! subscribers, used for discoveries, incoming requests, and subscription
//! changes. [`StateFeed`] retains the current adapter state and replays it to
//! every new observer, while still waking observers on each transition.

use tokio::sync::{broadcast, watch};

use crate::types::AdapterState;

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

/// Unbuffered-feeling multicast stream: every current subscriber sees each
/// published value, subscribers that attach later start from the next one.
/// Slow subscribers lose the oldest values rather than exerting backpressure.
#[derive(Debug)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Attach a new subscriber. No past values are replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Publishing with no subscribers is
    /// not an error; the value is simply dropped.
    pub fn publish(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ----------------------------------------------------------------------------
// Adapter State Feed
// ----------------------------------------------------------------------------

/// Current-value adapter state stream.
///
/// New observers immediately see the latest state; `changed()` on the watch
/// receiver wakes only for values emitted after the observer attached.
#[derive(Debug)]
pub struct StateFeed {
    tx: watch::Sender<AdapterState>,
}

impl StateFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AdapterState::Unknown);
        Self { tx }
    }

    /// Record a state transition and wake all observers.
    pub fn publish(&self, state: AdapterState) {
        self.tx.send_replace(state);
    }

    /// The latest observed adapter state.
    pub fn current(&self) -> AdapterState {
        *self.tx.borrow()
    }

    /// Attach an observer. The current value counts as already seen, so
    /// `changed()` resolves only for the next transition.
    pub fn watch(&self) -> watch::Receiver<AdapterState> {
        self.tx.subscribe()
    }
}

impl Default for StateFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_feed_replays_current_value() {
        let feed = StateFeed::new();
        feed.publish(AdapterState::PoweredOn);

        // An observer attaching after the transition still sees it.
        let observer = feed.watch();
        assert_eq!(*observer.borrow(), AdapterState::PoweredOn);
        assert_eq!(feed.current(), AdapterState::PoweredOn);
    }

    #[tokio::test]
    async fn test_state_feed_wakes_on_next_transition_only() {
        let feed = StateFeed::new();
        feed.publish(AdapterState::PoweredOff);

        let mut observer = feed.watch();
        // Nothing new yet from this observer's point of view.
        assert!(!observer.has_changed().unwrap());

        feed.publish(AdapterState::PoweredOn);
        observer.changed().await.unwrap();
        assert_eq!(*observer.borrow_and_update(), AdapterState::PoweredOn);
    }

    #[tokio::test]
    async fn test_event_bus_does_not_replay() {
        let bus: EventBus<u32> = EventBus::new(8);
        bus.publish(1);

        let mut late = bus.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        bus.publish(2);
        assert_eq!(late.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_event_bus_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::new(8);
        // Must not panic or error.
        bus.publish(5);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
