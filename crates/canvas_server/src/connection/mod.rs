//! Connection management for client connections.
//!
//! This module handles the lifecycle of a WebSocket connection: the
//! handshake, the snapshot on connect, identity resolution, the writer task
//! draining the connection's hub queue and the reader loop.

pub mod client;
pub mod handler;

pub use client::{ClientConnection, SessionState};
pub use handler::handle_connection;
