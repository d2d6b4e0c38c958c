//! Fan-out of state changes to live connections.
//!
//! Each registered connection owns an unbounded queue drained by its writer
//! task, so everything the hub sends to one connection arrives in the order
//! it was enqueued. Delivery is best-effort: a connection that went away
//! simply stops receiving.

use crate::board::BoardCache;
use crate::messaging::{Ack, ServerMessage};
use crate::types::{Balance, ConnectionId, PixelUpdate};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Registry of outbound queues keyed by connection.
#[derive(Debug)]
pub struct BroadcastHub {
    board: Arc<BoardCache>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl BroadcastHub {
    pub fn new(board: Arc<BoardCache>) -> Self {
        Self {
            board,
            connections: DashMap::new(),
        }
    }

    /// Subscribes `connection` and returns the receiving end of its queue.
    pub fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection, tx);
        debug!("Connection {} subscribed ({} live)", connection, self.connections.len());
        rx
    }

    /// Drops the queue; the writer task ends once it drains.
    pub fn unregister(&self, connection: ConnectionId) {
        if self.connections.remove(&connection).is_some() {
            debug!("Connection {} unsubscribed ({} live)", connection, self.connections.len());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sends the full board to one connection.
    ///
    /// The snapshot is enqueued under the board's read lock, so no pixel
    /// broadcast can slip between the snapshot and its enqueue.
    pub async fn send_snapshot_to(&self, connection: ConnectionId) {
        self.board
            .with_snapshot(|snapshot| self.send(connection, ServerMessage::board(snapshot)))
            .await;
    }

    /// Sends the full board to every connection.
    pub async fn broadcast_snapshot(&self) {
        self.board
            .with_snapshot(|snapshot| self.broadcast(ServerMessage::board(snapshot)))
            .await;
    }

    /// Sends one committed pixel to every connection, originator included.
    pub fn broadcast_pixel(&self, update: &PixelUpdate) {
        self.broadcast(ServerMessage::pixel(update));
    }

    pub fn send_balance(&self, connection: ConnectionId, balance: Balance) {
        self.send(connection, ServerMessage::Balance(balance));
    }

    pub fn send_ack(&self, connection: ConnectionId, ack: Ack) {
        self.send(connection, ServerMessage::Ack(ack));
    }

    fn send(&self, connection: ConnectionId, message: ServerMessage) {
        match self.connections.get(&connection) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    trace!("Queue of connection {} is closed", connection);
                }
            }
            None => trace!("Dropping message for departed connection {}", connection),
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for entry in self.connections.iter() {
            // Closed queues are pruned by `unregister`.
            let _ = entry.value().send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, Coordinate, Placement};
    use chrono::Utc;

    fn hub() -> (Arc<BoardCache>, BroadcastHub) {
        let board = Arc::new(BoardCache::new(32, Color::white()));
        (board.clone(), BroadcastHub::new(board))
    }

    fn update(x: i64, color: &str) -> PixelUpdate {
        PixelUpdate {
            coordinate: Coordinate::new(x, 0, 32).unwrap(),
            color: Color::parse(color).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_pixel_reaches_every_connection() {
        let (_, hub) = hub();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.register(a);
        let mut rx_b = hub.register(b);

        hub.broadcast_pixel(&update(1, "#FF0000"));

        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(rx.recv().await, Some(ServerMessage::SetPixel(p)) if p.x == 1));
        }
    }

    #[tokio::test]
    async fn test_targeted_messages_keep_order() {
        let (_, hub) = hub();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.register(a);
        let mut rx_b = hub.register(b);

        hub.send_balance(a, 4);
        hub.send_ack(a, Ack::success(1, "Pixel placed"));

        assert_eq!(rx_a.recv().await, Some(ServerMessage::Balance(4)));
        assert_eq!(
            rx_a.recv().await,
            Some(ServerMessage::Ack(Ack::success(1, "Pixel placed")))
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_board() {
        let (board, hub) = hub();
        board
            .apply(
                &Placement {
                    seq: 1,
                    coordinate: Coordinate::new(2, 3, 32).unwrap(),
                    color: Color::parse("#123456").unwrap(),
                    author: "ada@example.com".to_string(),
                    created_at: Utc::now(),
                },
                |_| {},
            )
            .await;

        let a = ConnectionId::new();
        let mut rx = hub.register(a);
        hub.send_snapshot_to(a).await;

        match rx.recv().await {
            Some(ServerMessage::SetBoard(cells)) => {
                assert_eq!(cells.len(), 1);
                assert_eq!(cells["2,3"].as_str(), "#123456");
            }
            other => panic!("expected setBoard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_ignored() {
        let (_, hub) = hub();
        let a = ConnectionId::new();
        let rx = hub.register(a);
        hub.unregister(a);
        drop(rx);

        hub.send_balance(a, 1);
        hub.broadcast_pixel(&update(0, "#000000"));
        assert_eq!(hub.connection_count(), 0);
    }
}
