use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use sd_proto::{PeerId, ProtoError, ServerMessage};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::hub::CoreEvent;

/// Largest frame accepted from a client.
const MAX_FRAME_BYTES: usize = 256 * 1024;

// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let source = source_address(&headers, addr);
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, source))
}

/// First `X-Forwarded-For` hop, else the TCP peer address.
pub fn source_address(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn handle_socket(socket: WebSocket, state: AppState, source: String) {
    let peer = PeerId::generate();
    let (mut sender, mut receiver) = socket.split();
    let (outbox_tx, mut outbox) = mpsc::channel::<ServerMessage>(state.config.outbox_capacity);

    if !state.hub.attach(peer.clone(), source.clone(), outbox_tx) {
        warn!(peer = %peer, "Hub unavailable, dropping connection");
        return;
    }
    info!(peer = %peer, source = %source, "Signaling connection opened");

    let mut ping = tokio::time::interval(state.config.heartbeat_interval());
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                // The hub closes our outbox when it evicts the peer
                let Some(message) = outgoing else {
                    debug!(peer = %peer, "Outbox closed by hub");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if !send_message(&mut sender, &message).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                let frame = match incoming {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                };

                let decoded = match frame {
                    Message::Text(text) => sd_proto::decode_client(&text),
                    Message::Binary(data) => sd_proto::decode_client_bytes(&data),
                    Message::Ping(_) | Message::Pong(_) => {
                        state.hub.event(CoreEvent::Activity { peer: peer.clone() });
                        continue;
                    }
                    Message::Close(_) => break,
                };

                match decoded {
                    Ok(message) => {
                        state.hub.event(CoreEvent::Inbound { peer: peer.clone(), message });
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Unparseable frame");
                        if !send_message(&mut sender, &bad_message(&e)).await {
                            break;
                        }
                    }
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    state.hub.event(CoreEvent::Disconnected { peer: peer.clone() });
    info!(peer = %peer, source = %source, "Signaling connection closed");
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match sd_proto::encode(message) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(event = message.event(), error = %e, "Failed to encode frame");
            true
        }
    }
}

fn bad_message(error: &ProtoError) -> ServerMessage {
    ServerMessage::bad_message(error.to_string())
}
