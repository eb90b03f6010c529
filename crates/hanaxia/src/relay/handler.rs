//! WebSocket and health handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::hub::RelayHub;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// GET /
pub async fn ws_handler(State(hub): State<Arc<RelayHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// GET /health
pub async fn health(State(hub): State<Arc<RelayHub>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": hub.connection_count(),
    }))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RelayHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (client, mut frames) = hub.register();
    let closed = hub.closed();

    let send_closed = closed.clone();
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                _ = send_closed.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = closed.cancelled() => break,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                hub.relay(client, text.as_str());
            }
            Some(Ok(Message::Binary(_))) => {
                debug!(client, "ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(client, error = %e, "websocket error");
                break;
            }
        }
    }

    hub.unregister(client);
    if !closed.is_cancelled() {
        send_task.abort();
    } else {
        let _ = send_task.await;
    }
}
