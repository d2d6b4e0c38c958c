//! The placement transaction: validate, debit and persist, apply, broadcast.

use crate::board::BoardCache;
use crate::error::{PlacementError, PlacementResult};
use crate::hub::BroadcastHub;
use crate::store::{CanvasStore, PlacementRequest};
use crate::types::{Balance, Color, ConnectionId, Coordinate, Identity};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

/// Runs pixel placements end to end.
///
/// There is no lock above the store: two placements from the same identity
/// race into the store transaction, which is what enforces the balance floor.
pub struct PlacementCoordinator {
    board: Arc<BoardCache>,
    store: Arc<dyn CanvasStore>,
    hub: Arc<BroadcastHub>,
    transaction_timeout: Duration,
}

impl PlacementCoordinator {
    pub fn new(
        board: Arc<BoardCache>,
        store: Arc<dyn CanvasStore>,
        hub: Arc<BroadcastHub>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            board,
            store,
            hub,
            transaction_timeout,
        }
    }

    /// Places one pixel on behalf of `identity` and returns its new balance.
    ///
    /// On success the board is updated, every connection receives the pixel
    /// and `connection` receives its new balance. On failure nothing is
    /// observable to anyone but the caller.
    #[instrument(skip(self, identity, color))]
    pub async fn place_pixel(
        &self,
        connection: ConnectionId,
        identity: Option<&Identity>,
        x: i64,
        y: i64,
        color: &str,
    ) -> PlacementResult<Balance> {
        let identity = identity.ok_or(PlacementError::Unauthenticated)?;
        let coordinate = Coordinate::new(x, y, self.board.grid_size())?;
        let color = Color::parse(color)?;

        if self.board.get(coordinate).await == color {
            debug!("{} already has color {}", coordinate, color);
            return Err(PlacementError::NoOp);
        }

        let deadline = Instant::now() + self.transaction_timeout;
        let request = PlacementRequest {
            author: identity.key().to_string(),
            coordinate,
            color,
        };
        let commit = self
            .store
            .commit_placement(request, deadline)
            .await
            .map_err(|e| {
                let e = PlacementError::from(e);
                if let PlacementError::Persistence(cause) = &e {
                    error!("Placement at {} failed to persist: {}", coordinate, cause);
                }
                e
            })?;

        let hub = &self.hub;
        let applied = self
            .board
            .apply(&commit.placement, |update| hub.broadcast_pixel(update))
            .await;
        if !applied {
            info!(
                "Placement #{} at {} committed but already superseded",
                commit.placement.seq, coordinate
            );
        }
        self.hub.send_balance(connection, commit.balance);

        Ok(commit.balance)
    }
}
