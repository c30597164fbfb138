//! Broadcast Gateway
//!
//! Fans events out to connected clients. Each client has a bounded queue
//! drained by its connection task; delivery is `try_send`, so a slow
//! client loses messages instead of stalling the engine. Per-client order
//! matches generation order.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::events::{Outbound, Recipient};
use crate::game::state::ParticipantId;
use crate::network::protocol::ServerMessage;

/// Subscriber registry.
#[derive(Debug, Default)]
pub struct BroadcastGateway {
    subscribers: BTreeMap<ParticipantId, mpsc::Sender<ServerMessage>>,
    dropped: u64,
}

impl BroadcastGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client queue.
    pub fn subscribe(&mut self, id: ParticipantId, sender: mpsc::Sender<ServerMessage>) {
        self.subscribers.insert(id, sender);
    }

    /// Remove a client queue.
    pub fn unsubscribe(&mut self, id: &ParticipantId) {
        self.subscribers.remove(id);
    }

    /// Deliver addressed events in order.
    pub fn deliver(&mut self, outbound: Vec<Outbound>) {
        for Outbound { recipient, event } in outbound {
            match recipient {
                Recipient::All => self.broadcast(ServerMessage::Event(event)),
                Recipient::Only(id) => self.send(&id, ServerMessage::Event(event)),
            }
        }
    }

    /// Send to every subscriber.
    pub fn broadcast(&mut self, message: ServerMessage) {
        let mut closed = Vec::new();
        for (id, tx) in &self.subscribers {
            if !push(tx, id, message.clone(), &mut self.dropped) {
                closed.push(*id);
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }

    /// Send to one subscriber. Unknown ids are ignored.
    pub fn send(&mut self, id: &ParticipantId, message: ServerMessage) {
        let open = match self.subscribers.get(id) {
            Some(tx) => push(tx, id, message, &mut self.dropped),
            None => true,
        };
        if !open {
            self.subscribers.remove(id);
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Messages dropped on full queues so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Returns `false` once the receiving side is gone.
fn push(
    tx: &mpsc::Sender<ServerMessage>,
    id: &ParticipantId,
    message: ServerMessage,
    dropped: &mut u64,
) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            *dropped += 1;
            warn!(participant = %id, "client queue full, message dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(participant = %id, "client queue closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEvent;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::from_bytes([n; 16])
    }

    fn event(window_ms: u64) -> GameEvent {
        GameEvent::RateLimited { window_ms }
    }

    #[tokio::test]
    async fn test_routing_and_order() {
        let mut gateway = BroadcastGateway::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        gateway.subscribe(pid(1), tx1);
        gateway.subscribe(pid(2), tx2);

        gateway.deliver(vec![
            Outbound { recipient: Recipient::All, event: event(1) },
            Outbound { recipient: Recipient::Only(pid(2)), event: event(2) },
            Outbound { recipient: Recipient::All, event: event(3) },
        ]);

        assert_eq!(rx1.recv().await, Some(ServerMessage::Event(event(1))));
        assert_eq!(rx1.recv().await, Some(ServerMessage::Event(event(3))));
        assert!(rx1.try_recv().is_err());

        assert_eq!(rx2.recv().await, Some(ServerMessage::Event(event(1))));
        assert_eq!(rx2.recv().await, Some(ServerMessage::Event(event(2))));
        assert_eq!(rx2.recv().await, Some(ServerMessage::Event(event(3))));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let mut gateway = BroadcastGateway::new();
        let (tx, mut rx) = mpsc::channel(1);
        gateway.subscribe(pid(1), tx);

        gateway.broadcast(ServerMessage::Event(event(1)));
        gateway.broadcast(ServerMessage::Event(event(2)));

        assert_eq!(gateway.dropped(), 1);
        assert_eq!(rx.recv().await, Some(ServerMessage::Event(event(1))));
        assert_eq!(gateway.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_removed() {
        let mut gateway = BroadcastGateway::new();
        let (tx, rx) = mpsc::channel(4);
        gateway.subscribe(pid(1), tx);
        drop(rx);

        gateway.broadcast(ServerMessage::Event(event(1)));
        assert!(gateway.is_empty());
    }
}
