//! WebSocket endpoint speaking the hub protocol

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::hub::{handle_frame, NotificationHub, ServerMessage};
use crate::server::state::AppState;

/// GET /ws - Upgrade and attach the socket to the hub
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!("Failed to encode hub message: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbound) = hub.connect();
    tracing::info!("WebSocket {} connected ({} open)", conn, hub.connection_count());

    loop {
        tokio::select! {
            pushed = outbound.recv() => {
                // None: the hub dropped this connection
                let Some(message) = pushed else { break };
                let Some(frame) = encode(&message) else { continue };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_frame(&hub, conn, &text);
                        let Some(frame) = encode(&reply) else { continue };
                        if sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket {} receive error", conn);
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(conn);
    tracing::info!("WebSocket {} disconnected", conn);
}
