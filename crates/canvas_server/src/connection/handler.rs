//! Per-connection WebSocket lifecycle.

use super::{ClientConnection, SessionState};
use crate::{
    error::ServerError,
    messaging::{route_client_message, ServerMessage},
    server::ServerContext,
    session::{resolve_identity, ConnectionMetadata},
};
use futures::{Sink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};
use tracing::{debug, error, info, warn};

/// Serves one client from handshake to disconnect.
///
/// 1. Accept the WebSocket handshake, capturing the request headers
/// 2. Register with the hub and enqueue the board snapshot
/// 3. Resolve the identity in the background
/// 4. Route inbound frames until the client goes away or stops reading
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
) -> Result<(), ServerError> {
    let mut headers = Vec::new();
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        Ok(response)
    })
    .await
    .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let metadata = ConnectionMetadata {
        remote_addr: addr,
        headers,
    };
    let client = Arc::new(ClientConnection::new(addr));
    info!("Connection {} established from {}", client.id, client.remote_addr);

    let (ws_sink, mut ws_receiver) = ws_stream.split();
    let outbound = context.hub.register(client.id);
    let send_timeout = context.config.send_timeout;
    let mut writer = tokio::spawn(write_outbound(outbound, ws_sink, send_timeout));

    // The board goes out before anything that depends on the identity.
    context.hub.send_snapshot_to(client.id).await;

    let resolution = tokio::spawn(resolve_session(client.clone(), metadata, context.clone()));

    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = route_client_message(&text, &client, &context).await {
                        debug!("Dropping frame from {}: {}", client.id, e);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Connection {} requested close", client.id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error for connection {}: {}", client.id, e);
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    client.disconnect().await;
    resolution.abort();
    context.hub.unregister(client.id);
    if !writer_done && timeout(send_timeout, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(
        "Connection {} from {} closed after {:?}",
        client.id,
        client.remote_addr,
        client.connected_for()
    );
    Ok(())
}

/// Drains a connection's queue into its socket.
///
/// Returns when the queue closes, the socket fails, or one frame cannot be
/// sent within `send_timeout`. Returning drops the queue, which the hub
/// treats as a gone connection.
pub(crate) async fn write_outbound<S>(
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    mut sink: S,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                continue;
            }
        };
        match timeout(send_timeout, sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Outbound send failed: {}", e);
                return;
            }
            Err(_) => {
                warn!("Client stopped reading for {:?}, dropping it", send_timeout);
                return;
            }
        }
    }
    let _ = timeout(send_timeout, sink.close()).await;
}

/// Resolves the identity of `client` and publishes its balance.
async fn resolve_session(
    client: Arc<ClientConnection>,
    metadata: ConnectionMetadata,
    context: Arc<ServerContext>,
) {
    if !client.transition(SessionState::Resolving).await {
        return;
    }

    let identity =
        resolve_identity(&context.resolver, &context.config.readiness, &metadata).await;
    let Some(identity) = identity else {
        debug!("Connection {} is anonymous", client.id);
        client.transition(SessionState::Anonymous).await;
        return;
    };

    match context.store.ensure_account(&identity).await {
        Ok(balance) => {
            let email = identity.email.clone();
            if client.transition(SessionState::Resolved(identity)).await {
                info!("Connection {} resolved as {}", client.id, email);
                context.hub.send_balance(client.id, balance);
            }
        }
        Err(e) => {
            error!("Failed to load account {}: {}", identity.email, e);
            client.transition(SessionState::Anonymous).await;
        }
    }
}
