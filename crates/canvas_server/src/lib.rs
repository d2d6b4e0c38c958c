//! # Canvas Server
//!
//! Live-state engine of a collaborative pixel canvas. Many clients view and
//! paint a shared fixed-size grid over WebSockets; every placement costs one
//! pixel of the painter's balance, debited atomically with the write.
//!
//! ## Architecture Overview
//!
//! * **Board Cache** ([`board`]) - authoritative in-memory coordinate → color map
//! * **Store** ([`store`]) - transactional ledger and append-only placement log
//! * **Placement Coordinator** ([`coordinator`]) - validate, debit and persist, apply, broadcast
//! * **Broadcast Hub** ([`hub`]) - ordered per-connection outbound queues
//! * **Session Resolver** ([`session`]) - handshake metadata → identity, awaited with a bounded poll
//! * **HTTP surface** ([`http`]) - time-lapse history paging and the balance top-up endpoint
//!
//! ### Message Flow
//!
//! 1. A client connects and immediately receives `setBoard`
//! 2. Its identity resolves in the background; it then receives `balance`
//! 3. It sends `{"event":"setPixel","ack":n,"data":{x,y,color}}`
//! 4. The coordinator commits the placement and updates the board
//! 5. Every client receives `setPixel`; the requester gets `balance` and `ack`
//!
//! ## Consistency
//!
//! The store assigns each committed placement a strictly increasing sequence
//! number and the board only applies a placement that is newer than what the
//! cell holds. Pixel broadcasts are enqueued under the board's write lock and
//! snapshots under its read lock, so a client never sees a cell regress.

pub use config::{AdminSettings, SeedMode, ServerConfig};
pub use error::{PlacementError, ResolveError, ServerError, StoreError};
pub use server::{CanvasServer, ServerContext};
pub use session::{ResolverSlot, SessionResolver};
pub use utils::{create_server, create_server_with_config};

pub mod board;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod hub;
pub mod messaging;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

mod connection;
