//! Client connection representation and session state.
//!
//! This module defines the structure of an individual client connection and
//! the state machine its identity resolution moves through.

use crate::types::{ConnectionId, Identity};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Identity resolution progress of one connection.
///
/// `Connected → Resolving → Resolved | Anonymous → Disconnected`. Placement
/// requests are only processed in `Resolved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Resolving,
    Resolved(Identity),
    Anonymous,
    Disconnected,
}

impl SessionState {
    fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected)
    }
}

/// Represents an individual client connection to the server.
///
/// The identity is resolved at most once and then cached here for the
/// lifetime of the connection.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique id, also the key of the connection's hub queue
    pub id: ConnectionId,

    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: Instant,

    state: RwLock<SessionState>,
}

impl ClientConnection {
    /// Creates a connection in the `Connected` state.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            connected_at: Instant::now(),
            state: RwLock::new(SessionState::Connected),
        }
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Moves to `next` unless the connection is already disconnected.
    ///
    /// Returns whether the transition happened.
    pub async fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write().await;
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    pub async fn disconnect(&self) {
        *self.state.write().await = SessionState::Disconnected;
    }

    /// The resolved identity, if the connection is in `Resolved`.
    pub async fn identity(&self) -> Option<Identity> {
        match &*self.state.read().await {
            SessionState::Resolved(identity) => Some(identity.clone()),
            _ => None,
        }
    }
}
