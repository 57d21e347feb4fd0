use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per resource (staff
/// events are keyed by staff id). This is how callers wire up
/// fire-and-forget work like confirmation mail: subscribe, react, never
/// block the engine. A lagged or missing receiver never affects a commit.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for one resource or staff id. Creates the
    /// channel if needed.
    pub fn subscribe(&self, channel_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&channel_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a resource is deleted).
    pub fn remove(&self, channel_id: &Ulid) {
        self.channels.remove(channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = Event::BookingCreated {
            id: Ulid::new(),
            resource_id: rid,
            user_id: Ulid::new(),
            staff_id: None,
            span: Span::new(1_000, 2_000),
            quantity: 1,
            label: None,
        };
        hub.send(rid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        // No subscriber — should not panic
        hub.send(rid, &Event::ResourceDeleted { id: rid });
    }

    #[tokio::test]
    async fn removed_channel_stops_delivery() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);
        hub.remove(&rid);
        hub.send(rid, &Event::ResourceDeleted { id: rid });
        // Sender side is gone, so the receiver observes closure, not an event.
        assert!(rx.recv().await.is_err());
    }
}
