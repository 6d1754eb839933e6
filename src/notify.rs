use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub publishing committed events per barber calendar. The
/// surrounding app subscribes to keep its live agenda views current.
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

    /// Subscribe to events for one barber. Creates the channel if needed.
    pub fn subscribe(&self, barber_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(barber_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening on that barber; a
    /// channel whose last subscriber has gone away is pruned on the spot, so
    /// churning barbers don't accumulate dead senders in the map.
    pub fn send(&self, barber_id: Ulid, event: &Event) {
        let Some(sender) = self.channels.get(&barber_id) else {
            return;
        };
        if sender.send(event.clone()).is_ok() {
            return;
        }
        drop(sender);
        self.channels
            .remove_if(&barber_id, |_, s| s.receiver_count() == 0);
    }

    /// Drop a barber's channel (e.g. barber removed from the unit).
    pub fn remove(&self, barber_id: &Ulid) {
        self.channels.remove(barber_id);
    }

    /// Live subscribers for one barber's calendar.
    pub fn subscriber_count(&self, barber_id: &Ulid) -> usize {
        self.channels
            .get(barber_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}
