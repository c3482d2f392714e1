use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast of committed events.
///
/// Channels are keyed by vehicle id (booking, availability and journey events) or by user id
/// (that user's notifications). Events are sent only after they are durable and applied.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a vehicle or user channel. Creates the channel if needed.
    pub fn subscribe(&self, key: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening; a channel found without
    /// receivers is dropped.
    pub fn send(&self, key: Ulid, event: &Event) {
        let orphaned = match self.channels.get(&key) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if orphaned {
            self.prune(&key);
        }
    }

    /// Drop a channel whose subscribers are all gone.
    pub fn prune(&self, key: &Ulid) {
        self.channels
            .remove_if(key, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vehicle = Ulid::new();
        let mut rx = hub.subscribe(vehicle);

        let event = Event::AvailabilityUpdated {
            id: vehicle,
            availability: crate::model::Availability::Open,
        };
        hub.send(vehicle, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        hub.send(
            user,
            &Event::NotificationRead {
                id: Ulid::new(),
                user_id: user,
            },
        );
    }

    #[tokio::test]
    async fn prune_keeps_live_channels() {
        let hub = NotifyHub::new();
        let live = Ulid::new();
        let dead = Ulid::new();
        let mut rx = hub.subscribe(live);
        drop(hub.subscribe(dead));

        hub.prune(&live);
        hub.prune(&dead);
        assert_eq!(hub.channels.len(), 1);

        let event = Event::NotificationRead {
            id: Ulid::new(),
            user_id: live,
        };
        hub.send(live, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_drops_abandoned_channel() {
        let hub = NotifyHub::new();
        let vehicle = Ulid::new();
        drop(hub.subscribe(vehicle));
        assert_eq!(hub.channels.len(), 1);

        hub.send(
            vehicle,
            &Event::AvailabilityUpdated {
                id: vehicle,
                availability: crate::model::Availability::Open,
            },
        );
        assert!(hub.channels.is_empty());
    }
}
