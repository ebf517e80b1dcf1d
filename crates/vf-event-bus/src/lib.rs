//! Event bus for raw source events
//!
//! The OS bridge fires every [`SourceEvent`] here. Detectors subscribe to
//! the [`EventKind`]s they consume when they start listening and drop their
//! receivers when they stop, so a kind nobody is interested in costs one map
//! lookup per event.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use vf_core::{EventKind, SourceEvent};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to source events
///
/// Supports:
/// - Subscribing to one event kind
/// - Subscribing to every event
/// - Firing events to all subscribers of their kind
pub struct EventBus {
    /// Map of event kinds to their broadcast senders
    listeners: DashMap<EventKind, broadcast::Sender<SourceEvent>>,
    /// Sender for subscribers of every kind
    match_all_sender: broadcast::Sender<SourceEvent>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to events of one kind
    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<SourceEvent> {
        trace!(%kind, "Subscribing to event kind");
        self.listeners
            .entry(kind)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<SourceEvent> {
        self.match_all_sender.subscribe()
    }

    /// Fire an event to all subscribers
    ///
    /// Returns the number of kind-specific receivers that got the event.
    pub fn fire(&self, event: SourceEvent) -> usize {
        let kind = event.kind();
        trace!(%kind, "Firing event");

        let delivered = match self.listeners.get(&kind) {
            // Send errors just mean no active receivers
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => 0,
        };

        let _ = self.match_all_sender.send(event);
        delivered
    }

    /// Number of live receivers for one kind
    pub fn receiver_count(&self, kind: EventKind) -> usize {
        self.listeners
            .get(&kind)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of event kinds that have ever been subscribed
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use vf_core::{CallState, SmsReceived};

    fn sms(content: &str) -> SourceEvent {
        SourceEvent::Sms(SmsReceived {
            sender: "10086".into(),
            content: content.into(),
        })
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventKind::Sms);

        assert_eq!(bus.fire(sms("hello")), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, sms("hello"));
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let bus = EventBus::new();
        let mut sms_rx = bus.subscribe(EventKind::Sms);
        let mut call_rx = bus.subscribe(EventKind::CallState);

        bus.fire(SourceEvent::CallState {
            state: CallState::Ringing,
        });

        assert_ok!(call_rx.recv().await);
        assert_err!(sms_rx.try_recv());
    }

    #[tokio::test]
    async fn test_subscribe_all() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.fire(sms("one"));
        bus.fire(SourceEvent::CallState {
            state: CallState::Idle,
        });

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Sms);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::CallState);
    }

    #[test]
    fn test_receiver_count_drops_with_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.receiver_count(EventKind::Location), 0);
        let rx = bus.subscribe(EventKind::Location);
        assert_eq!(bus.receiver_count(EventKind::Location), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(EventKind::Location), 0);
        assert_eq!(bus.fire(SourceEvent::Location(vf_core::LocationFix {
            latitude: 0.0,
            longitude: 0.0,
            accuracy: None,
        })), 0);
    }
}
