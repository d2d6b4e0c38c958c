//! Message type definitions for client-server communication.
//!
//! Every frame is a JSON text frame carrying an `event` name and a `data`
//! payload. Client requests may carry an `ack` id; the server answers such a
//! request with exactly one `ack` event bearing the same id.

use crate::board::BoardSnapshot;
use crate::types::{Balance, Color, PixelUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A frame sent from a client to the server.
///
/// # Example
///
/// ```json
/// {
///   "event": "setPixel",
///   "ack": 7,
///   "data": { "x": 3, "y": 4, "color": "#FF0000" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// The event name, e.g. `setPixel`
    pub event: String,

    /// Acknowledgment id the client expects an `ack` for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,

    /// The event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `setPixel` request.
///
/// Coordinates are signed so that negative values reach the bounds check
/// instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetPixelRequest {
    pub x: i64,
    pub y: i64,
    pub color: String,
}

/// A single cell, as broadcast in `setPixel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPayload {
    pub x: u32,
    pub y: u32,
    pub color: Color,
}

impl From<&PixelUpdate> for PixelPayload {
    fn from(update: &PixelUpdate) -> Self {
        Self {
            x: update.coordinate.x,
            y: update.coordinate.y,
            color: update.color.clone(),
        }
    }
}

/// Outcome of one acknowledged request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: u64,
    pub message: String,
    pub success: bool,
}

impl Ack {
    pub fn success(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            success: true,
        }
    }

    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            success: false,
        }
    }
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full board, keyed by `"x,y"`
    SetBoard(BTreeMap<String, Color>),
    /// One committed placement
    SetPixel(PixelPayload),
    /// The receiving client's current balance
    Balance(Balance),
    /// Answer to a request carrying an `ack` id
    Ack(Ack),
}

impl ServerMessage {
    pub fn board(snapshot: &BoardSnapshot) -> Self {
        ServerMessage::SetBoard(
            snapshot
                .iter()
                .map(|(coord, color)| (coord.key(), color.clone()))
                .collect(),
        )
    }

    pub fn pixel(update: &PixelUpdate) -> Self {
        ServerMessage::SetPixel(update.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use serde_json::json;

    #[test]
    fn test_server_message_wire_shape() {
        let update = PixelUpdate {
            coordinate: Coordinate::new(3, 4, 32).unwrap(),
            color: Color::parse("#ff0000").unwrap(),
        };
        assert_eq!(
            serde_json::to_value(ServerMessage::pixel(&update)).unwrap(),
            json!({"event": "setPixel", "data": {"x": 3, "y": 4, "color": "#FF0000"}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Balance(12)).unwrap(),
            json!({"event": "balance", "data": 12})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Ack(Ack::failure(9, "Invalid color"))).unwrap(),
            json!({"event": "ack", "data": {"id": 9, "message": "Invalid color", "success": false}})
        );
    }

    #[test]
    fn test_board_uses_coordinate_keys() {
        let mut snapshot = BoardSnapshot::new();
        snapshot.insert(Coordinate::new(1, 2, 32).unwrap(), Color::parse("#00FF00").unwrap());
        assert_eq!(
            serde_json::to_value(ServerMessage::board(&snapshot)).unwrap(),
            json!({"event": "setBoard", "data": {"1,2": "#00FF00"}})
        );
    }

    #[test]
    fn test_client_message_without_ack() {
        let message: ClientMessage =
            serde_json::from_str(r##"{"event":"setPixel","data":{"x":1,"y":2,"color":"#000000"}}"##)
                .unwrap();
        assert_eq!(message.ack, None);
        let request: SetPixelRequest = serde_json::from_value(message.data).unwrap();
        assert_eq!(request.x, 1);
    }
}
