//! WebSocket handler streaming feed frames to viewers

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::messages::WireMessage;

use super::FeedState;

/// WebSocket upgrade handler
///
/// GET /api/ws/monitoring
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<FeedState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Reply to a frame sent by the viewer, if it expects one
///
/// Heartbeats are echoed so the viewer sees the feed is alive.
fn reply_to(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    WireMessage::is_heartbeat(&value).then(|| WireMessage::heartbeat().to_string())
}

async fn handle_websocket(socket: WebSocket, state: FeedState) {
    // subscribe before counting so a counted client never misses a frame
    let mut frames = state.subscribe();
    let clients = state.client_connected();
    info!("feed client connected ({clients} connected)");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("feed client lagged, skipped {skipped} frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("feed broadcast channel closed");
                        break;
                    }
                },

                Some(reply) = reply_rx.recv() => reply,
            };

            if sender.send(Message::Text(frame)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = reply_to(&text)
                        && reply_tx.send(reply).await.is_err()
                    {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    let clients = state.client_disconnected();
    info!("feed client disconnected ({clients} connected)");
}
