//! Convenience constructors.

use crate::{config::ServerConfig, server::CanvasServer, session::ResolverSlot, store::MemoryStore};
use std::sync::Arc;

/// A server with default configuration, a volatile store and no resolver yet.
pub fn create_server() -> CanvasServer {
    create_server_with_config(ServerConfig::default())
}

/// A server with `config`, a volatile store and no resolver yet.
///
/// `config.journal_path` is ignored; use [`CanvasServer::open`] for a
/// journaled store.
pub fn create_server_with_config(config: ServerConfig) -> CanvasServer {
    let store = Arc::new(MemoryStore::new(config.starting_balance));
    CanvasServer::new(config, store, ResolverSlot::empty())
}
