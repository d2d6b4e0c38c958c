//! Server wiring: shared context, accept loop, seeding and shutdown.

mod context;
mod core;

pub use self::context::ServerContext;
pub use self::core::{seed_board, CanvasServer};
