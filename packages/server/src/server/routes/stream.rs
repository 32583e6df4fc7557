//! WebSocket event stream.
//!
//! GET /ws upgrades and forwards every engine event as a JSON text frame.
//! Slow clients that lag the broadcast buffer receive a `lagged` notice
//! with the number of missed events.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Extension;
use axum::response::IntoResponse;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::kernel::Kernel;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(kernel): Extension<Kernel>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, kernel))
}

async fn handle_socket(mut socket: WebSocket, kernel: Kernel) {
    let mut rx = kernel.hub.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let payload = match event {
                    Ok(value) => value,
                    Err(RecvError::Lagged(missed)) => {
                        json!({"type": "lagged", "missed": missed})
                    }
                    Err(RecvError::Closed) => break,
                };
                let Ok(text) = serde_json::to_string(&payload) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }
}
