//! Link event bus.
//!
//! A [`tokio::sync::broadcast`] channel carrying [`LinkEvent`]s: state
//! transitions, device connections, and packet arrivals. Publishing is
//! synchronous and never blocks the channel thread; subscribers that fall
//! behind lose the oldest events.

use headlink_types::{LinkEvent, LinkEventKind};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clones share the same channel.
#[derive(Clone, Debug)]
pub struct LinkEventBus {
    sender: broadcast::Sender<LinkEvent>,
}

impl LinkEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it;
    /// `0` when nobody is listening, which is not an error.
    pub fn publish(&self, kind: LinkEventKind) -> usize {
        self.sender.send(LinkEvent::new(kind)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> LinkEventReceiver {
        LinkEventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for LinkEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of a [`LinkEventBus`].
pub struct LinkEventReceiver {
    receiver: broadcast::Receiver<LinkEvent>,
}

impl LinkEventReceiver {
    /// Wait for the next event. Returns `None` when the bus has shut down.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "link event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv) for synchronous callers.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "link event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headlink_types::{ConnectionState, PacketKind};

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = LinkEventBus::default();
        assert_eq!(bus.publish(LinkEventKind::PacketPublished(PacketKind::Joint)), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = LinkEventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(LinkEventKind::StateChanged {
            from: ConnectionState::Idle,
            to: ConnectionState::Listening,
        });
        bus.publish(LinkEventKind::PacketPublished(PacketKind::Head));

        let first = rx.recv().await.expect("first event");
        assert!(matches!(first.kind, LinkEventKind::StateChanged { .. }));
        let second = rx.recv().await.expect("second event");
        assert_eq!(second.kind, LinkEventKind::PacketPublished(PacketKind::Head));
    }

    #[test]
    fn lagged_subscriber_skips_to_newest() {
        let bus = LinkEventBus::new(4);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(LinkEventKind::PacketPublished(PacketKind::Joint));
        }
        bus.publish(LinkEventKind::PacketPublished(PacketKind::GameState));

        let mut last = None;
        while let Some(event) = rx.try_recv() {
            last = Some(event.kind);
        }
        assert_eq!(last, Some(LinkEventKind::PacketPublished(PacketKind::GameState)));
    }
}
