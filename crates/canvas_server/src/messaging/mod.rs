//! Message handling and routing for client communication.
//!
//! This module defines the JSON frames exchanged with clients and routes
//! inbound requests to the placement coordinator.

pub mod router;
pub mod types;

pub use router::{parse_client_message, route_client_message, InboundRequest, PIXEL_PLACED};
pub use types::{Ack, ClientMessage, PixelPayload, ServerMessage, SetPixelRequest};
