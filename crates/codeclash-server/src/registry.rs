use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use codeclash_core::player::ConnectionId;

/// A frame queued for one socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Utf8Bytes),
    /// Send a close frame and stop writing.
    Close,
}

pub type OutboundSender = mpsc::Sender<Outbound>;

/// Open client connections, keyed by the id assigned at accept time.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, OutboundSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a fresh random id.
    pub fn register(&mut self, sender: OutboundSender) -> ConnectionId {
        let mut id = ConnectionId::random();
        while self.connections.contains_key(&id) {
            id = ConnectionId::random();
        }
        self.connections.insert(id, sender);
        tracing::debug!(conn = %id, open = self.connections.len(), "Connection registered");
        id
    }

    pub fn unregister(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            tracing::debug!(conn = %id, open = self.connections.len(), "Connection unregistered");
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Deliver to one connection. Closed or full channels drop the frame.
    pub fn send(&self, id: ConnectionId, frame: Outbound) {
        if let Some(sender) = self.connections.get(&id)
            && let Err(e) = sender.try_send(frame)
        {
            tracing::debug!(conn = %id, error = %e, "Failed to send to connection (slow or closed)");
        }
    }

    /// Deliver to every connection whose id satisfies `include`.
    pub fn broadcast(&self, include: impl Fn(ConnectionId) -> bool, frame: &Outbound) {
        for (&id, sender) in &self.connections {
            if include(id)
                && let Err(e) = sender.try_send(frame.clone())
            {
                tracing::debug!(conn = %id, error = %e, "Skipping broadcast to slow client");
            }
        }
    }

    /// Ask every writer to close its socket and forget all connections.
    pub fn close_all(&mut self) {
        let count = self.connections.len();
        for (id, sender) in self.connections.drain() {
            if let Err(e) = sender.try_send(Outbound::Close) {
                tracing::debug!(conn = %id, error = %e, "Failed to queue close frame");
            }
        }
        tracing::debug!(count, "Closed all connections");
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Outbound {
        Outbound::Text(Utf8Bytes::from(s.to_string()))
    }

    #[test]
    fn register_assigns_distinct_ids() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        registry.unregister(a);
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn send_reaches_only_target() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = registry.register(tx_a);
        let _b = registry.register(tx_b);

        registry.send(a, text("hello"));
        assert_eq!(rx_a.try_recv().unwrap(), text("hello"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_respects_predicate() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = registry.register(tx_a);
        let _b = registry.register(tx_b);

        registry.broadcast(|id| id == a, &text("only a"));
        assert_eq!(rx_a.try_recv().unwrap(), text("only a"));
        assert!(rx_b.try_recv().is_err());

        registry.broadcast(|_| true, &text("all"));
        assert_eq!(rx_a.try_recv().unwrap(), text("all"));
        assert_eq!(rx_b.try_recv().unwrap(), text("all"));
    }

    #[test]
    fn closed_or_full_recipient_does_not_block_others() {
        let mut registry = ConnectionRegistry::new();
        let (tx_closed, rx_closed) = mpsc::channel(4);
        let (tx_full, _rx_full) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(4);
        registry.register(tx_closed);
        let full = registry.register(tx_full);
        registry.register(tx_ok);
        drop(rx_closed);
        registry.send(full, text("fill"));

        registry.broadcast(|_| true, &text("fan-out"));
        assert_eq!(rx_ok.try_recv().unwrap(), text("fan-out"));
    }

    #[test]
    fn send_to_unknown_id_is_silent() {
        let registry = ConnectionRegistry::new();
        registry.send(ConnectionId::random(), text("nobody"));
        assert!(registry.is_empty());
    }

    #[test]
    fn close_all_queues_close_and_empties() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register(tx_a);
        registry.register(tx_b);

        registry.close_all();
        assert!(registry.is_empty());
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Close);
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Close);
    }
}
