//! Event bus implementation using tokio broadcast channels

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{Event, EventEnvelope};

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1000;

/// Event bus for publishing and subscribing to orchestration events.
///
/// Every published event is stamped with the next sequence number, so
/// subscribers can order events from one bus even after lagging.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Publishing never blocks; with no subscribers the event is dropped.
    pub fn publish(&self, event: Event) -> usize {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(EventEnvelope::new(sequence, event))
            .unwrap_or(0)
    }

    /// Subscribe to events.
    ///
    /// Events published before subscribing will not be received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single session
    pub fn subscribe_session(&self, session_id: Uuid) -> SessionSubscription {
        SessionSubscription {
            session_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Receiver filtered to one session's events
pub struct SessionSubscription {
    session_id: Uuid,
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl SessionSubscription {
    /// Wait for the next event of this session.
    ///
    /// Lagged receivers skip the dropped events. Returns `None` once the
    /// bus is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.event.session_id() == self.session_id => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event of this session already buffered.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.event.session_id() == self.session_id => {
                    events.push(envelope)
                }
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aborted(session_id: Uuid) -> Event {
        Event::Aborted {
            session_id,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let session_id = Uuid::new_v4();
        let sent = bus.publish(aborted(session_id));
        assert_eq!(sent, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.session_id(), session_id);
        assert_eq!(received.sequence, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let sent = bus.publish(aborted(Uuid::new_v4()));
        assert_eq!(sent, 2);

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert_eq!(received1.id, received2.id);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new();

        // No subscribers, event is dropped but still counted
        let sent = bus.publish(aborted(Uuid::new_v4()));
        assert_eq!(sent, 0);
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test]
    async fn test_sequence_increments() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for _ in 0..3 {
            bus.publish(aborted(Uuid::new_v4()));
        }

        let sequences: Vec<u64> = (0..3).map(|_| rx.try_recv().unwrap().sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(bus.event_count(), 3);
    }

    #[tokio::test]
    async fn test_session_subscription_filters() {
        let bus = EventBus::new();
        let mine = Uuid::new_v4();
        let mut sub = bus.subscribe_session(mine);

        bus.publish(aborted(Uuid::new_v4()));
        bus.publish(aborted(mine));
        bus.publish(aborted(Uuid::new_v4()));

        let received = sub.recv().await.unwrap();
        assert_eq!(received.event.session_id(), mine);
        assert_eq!(received.sequence, 1);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_clone_shares_sequence() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.publish(aborted(Uuid::new_v4()));
        bus2.publish(aborted(Uuid::new_v4()));
        assert_eq!(bus1.event_count(), 2);
        assert_eq!(bus2.event_count(), 2);
    }
}
