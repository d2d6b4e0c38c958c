//! Core canvas server implementation.
//!
//! This module contains the `CanvasServer` struct, which wires the board,
//! store, hub and coordinator together, runs the WebSocket accept loop and
//! the optional HTTP surface, and seeds the board in the background.

use crate::{
    config::{SeedMode, ServerConfig},
    connection::handle_connection,
    error::{ServerError, StoreError},
    http::{self, HttpState},
    server::ServerContext,
    session::ResolverSlot,
    store::{CanvasStore, MemoryStore},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// The canvas server.
///
/// # Startup Sequence
///
/// 1. Bind the WebSocket listener (and the HTTP listener if configured)
/// 2. Start seeding the board in the background
/// 3. Accept connections until shutdown is requested
///
/// Connections are accepted while seeding runs; they get the board as it is
/// at connect time and a fresh snapshot once seeding completes.
pub struct CanvasServer {
    context: Arc<ServerContext>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl CanvasServer {
    /// Creates a server over an existing store.
    pub fn new(config: ServerConfig, store: Arc<dyn CanvasStore>, resolver: ResolverSlot) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            context: Arc::new(ServerContext::new(config, store, resolver)),
            shutdown_sender,
        }
    }

    /// Creates a server with a [`MemoryStore`], journaled if the
    /// configuration names a journal file.
    pub async fn open(config: ServerConfig, resolver: ResolverSlot) -> Result<Self, ServerError> {
        let store: Arc<dyn CanvasStore> = match &config.journal_path {
            Some(path) => {
                info!("Opening journal {}", path.display());
                Arc::new(MemoryStore::open(path, config.starting_balance).await?)
            }
            None => {
                warn!("No journal configured, placements will not survive a restart");
                Arc::new(MemoryStore::new(config.starting_balance))
            }
        };
        Ok(Self::new(config, store, resolver))
    }

    /// Binds the configured addresses and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let config = &self.context.config;
        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;

        if let Some(http_address) = config.http_address {
            let http_listener = TcpListener::bind(http_address)
                .await
                .map_err(|e| ServerError::Network(format!("HTTP bind failed: {e}")))?;
            let router = self.http_router();
            let mut shutdown_receiver = self.shutdown_sender.subscribe();
            tokio::spawn(async move {
                info!("HTTP surface listening on {}", http_address);
                let served = axum::serve(http_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_receiver.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    error!("HTTP surface failed: {}", e);
                }
            });
        }

        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(e.to_string()))?;
        info!("Canvas server listening on {}", local_addr);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        self.spawn_seeding();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let context = self.context.clone();
                        if context.hub.connection_count() >= context.config.max_connections {
                            warn!("Connection limit reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, context).await {
                                debug!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Router of the HTTP query/admin surface.
    pub fn http_router(&self) -> axum::Router {
        let config = &self.context.config;
        http::router(
            HttpState {
                store: self.context.store.clone(),
                page_limit: config.timelapse_page_limit,
            },
            &config.admin,
        )
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        info!("Shutting down server...");
        let _ = self.shutdown_sender.send(());
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    /// The slot the session resolver is installed into.
    pub fn resolver_slot(&self) -> ResolverSlot {
        self.context.resolver.clone()
    }

    fn spawn_seeding(&self) {
        if self.context.config.seed == SeedMode::Cold {
            info!("Cold start, board not seeded");
            return;
        }
        let context = self.context.clone();
        tokio::spawn(async move {
            match seed_board(&context).await {
                Ok(changed) => {
                    info!("Board seeded with {} cells", changed);
                    context.hub.broadcast_snapshot().await;
                }
                Err(e) => error!("Board seeding failed: {}", e),
            }
        });
    }
}

/// Loads the latest placement per cell into the board according to the
/// configured [`SeedMode`].
pub async fn seed_board(context: &ServerContext) -> Result<usize, StoreError> {
    let mode = &context.config.seed;
    if *mode == SeedMode::Cold {
        return Ok(0);
    }
    let latest = context
        .store
        .latest_per_coordinate(mode.since(Utc::now()))
        .await?;
    Ok(context.board.seed(latest).await)
}
