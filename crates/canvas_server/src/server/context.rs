//! Shared state handed to every connection task.

use crate::{
    board::BoardCache, config::ServerConfig, coordinator::PlacementCoordinator,
    hub::BroadcastHub, session::ResolverSlot, store::CanvasStore,
};
use std::sync::Arc;

/// Everything a connection needs, wired once at server construction.
pub struct ServerContext {
    pub config: ServerConfig,
    pub board: Arc<BoardCache>,
    pub store: Arc<dyn CanvasStore>,
    pub hub: Arc<BroadcastHub>,
    pub coordinator: Arc<PlacementCoordinator>,
    pub resolver: ResolverSlot,
}

impl ServerContext {
    pub fn new(config: ServerConfig, store: Arc<dyn CanvasStore>, resolver: ResolverSlot) -> Self {
        let board = Arc::new(BoardCache::new(
            config.grid_size,
            config.background_color.clone(),
        ));
        let hub = Arc::new(BroadcastHub::new(board.clone()));
        let coordinator = Arc::new(PlacementCoordinator::new(
            board.clone(),
            store.clone(),
            hub.clone(),
            config.transaction_timeout,
        ));
        Self {
            config,
            board,
            store,
            hub,
            coordinator,
            resolver,
        }
    }
}
