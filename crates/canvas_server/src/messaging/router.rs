//! Dispatch of inbound client frames.

use crate::{
    connection::ClientConnection,
    error::ServerError,
    messaging::{Ack, ClientMessage, SetPixelRequest},
    server::ServerContext,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// The success message of a placement ack.
pub const PIXEL_PLACED: &str = "Pixel placed";

/// A parsed, well-formed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    SetPixel { ack: u64, request: SetPixelRequest },
}

/// Parses a raw text frame.
///
/// Malformed envelopes, unknown events, bad payloads and requests without an
/// ack id are all schema failures.
pub fn parse_client_message(text: &str) -> Result<InboundRequest, ServerError> {
    let message: ClientMessage = serde_json::from_str(text)
        .map_err(|e| ServerError::Network(format!("Invalid JSON: {e}")))?;

    match message.event.as_str() {
        "setPixel" => {
            let ack = message
                .ack
                .ok_or_else(|| ServerError::Network("setPixel without ack id".to_string()))?;
            let request = serde_json::from_value(message.data)
                .map_err(|e| ServerError::Network(format!("Invalid setPixel payload: {e}")))?;
            Ok(InboundRequest::SetPixel { ack, request })
        }
        other => Err(ServerError::Network(format!("Unknown event '{other}'"))),
    }
}

/// Routes one text frame from `client`.
///
/// Placements run on their own task so a slow store never stalls the
/// connection's reader, and so a placement finishes even if the client
/// disconnects mid-flight. Requests from connections without a resolved
/// identity are dropped without an ack.
pub async fn route_client_message(
    text: &str,
    client: &Arc<ClientConnection>,
    context: &Arc<ServerContext>,
) -> Result<(), ServerError> {
    match parse_client_message(text)? {
        InboundRequest::SetPixel { ack, request } => {
            let Some(identity) = client.identity().await else {
                debug!("Dropping setPixel from unresolved connection {}", client.id);
                return Ok(());
            };

            let connection = client.id;
            let context = context.clone();
            tokio::spawn(async move {
                let outcome = context
                    .coordinator
                    .place_pixel(connection, Some(&identity), request.x, request.y, &request.color)
                    .await;
                match outcome {
                    Ok(_) => context.hub.send_ack(connection, Ack::success(ack, PIXEL_PLACED)),
                    Err(e) if e.is_acknowledged() => {
                        debug!("Placement from {} rejected: {}", connection, e);
                        context
                            .hub
                            .send_ack(connection, Ack::failure(ack, e.client_message()));
                    }
                    Err(e) => trace!("Dropping placement from {}: {}", connection, e),
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_pixel() {
        let parsed = parse_client_message(
            r##"{"event":"setPixel","ack":3,"data":{"x":1,"y":2,"color":"#abcdef"}}"##,
        )
        .unwrap();
        assert_eq!(
            parsed,
            InboundRequest::SetPixel {
                ack: 3,
                request: SetPixelRequest {
                    x: 1,
                    y: 2,
                    color: "#abcdef".to_string()
                }
            }
        );
    }

    #[test]
    fn test_schema_failures() {
        for text in [
            "not json",
            r##"{"event":"setPixel","data":{"x":1,"y":2,"color":"#000000"}}"##,
            r##"{"event":"setPixel","ack":1,"data":{"x":1.5,"y":2,"color":"#000000"}}"##,
            r##"{"event":"setPixel","ack":1,"data":{"x":"1","y":2,"color":"#000000"}}"##,
            r##"{"event":"setPixel","ack":1,"data":{"x":1,"y":2}}"##,
            r##"{"event":"eraseBoard","ack":1,"data":{}}"##,
        ] {
            assert!(parse_client_message(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn test_negative_coordinates_reach_validation() {
        let parsed = parse_client_message(
            r##"{"event":"setPixel","ack":1,"data":{"x":-1,"y":0,"color":"#000000"}}"##,
        )
        .unwrap();
        assert!(matches!(parsed, InboundRequest::SetPixel { request, .. } if request.x == -1));
    }
}
