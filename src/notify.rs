use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Ms, SeatId, SeatState};

const CHANNEL_CAPACITY: usize = 256;

/// Seats of one showtime that changed in a single commit.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatChange {
    pub showtime_id: String,
    pub changes: Vec<(SeatId, SeatState)>,
    pub at: Ms,
}

/// Broadcast hub for seat changes per showtime.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<SeatChange>>,
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

    /// Subscribe to changes on a showtime. Creates the channel if needed.
    pub fn subscribe(&self, showtime_id: &str) -> broadcast::Receiver<SeatChange> {
        let sender = self
            .channels
            .entry(showtime_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, change: SeatChange) {
        if let Some(sender) = self.channels.get(&change.showtime_id) {
            let _ = sender.send(change);
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(showtime: &str) -> SeatChange {
        SeatChange {
            showtime_id: showtime.into(),
            changes: vec![(SeatId::new('A', 1), SeatState::Available)],
            at: 1,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("show-1");

        hub.send(change("show-1"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, change("show-1"));
    }

    #[tokio::test]
    async fn other_showtimes_are_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("show-1");
        hub.send(change("show-2"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(change("show-1"));
    }

    #[tokio::test]
    async fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe("show-1");
        drop(rx);
        hub.prune();
        assert!(hub.channels.is_empty());
    }
}
