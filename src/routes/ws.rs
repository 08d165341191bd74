//! WebSocket transport for relay sessions.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        OriginalUri, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;
use crate::docker::DockerService;
use crate::relay::{self, ClientChannel, INVALID_PATH_CLOSE_CODE, RelayTarget, ServerMessage};

/// Buffered messages per direction before the slower side applies backpressure.
const CHANNEL_CAPACITY: usize = 64;

/// GET /ws/containers/{id}/{logs|stats|exec}
///
/// Every other path under `/ws` is still upgraded, then closed with 4000.
async fn upgrade(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    ws: WebSocketUpgrade,
) -> Response {
    let path = uri.path().to_string();
    let docker = state.docker.clone();

    ws.on_upgrade(move |socket| async move {
        match RelayTarget::from_path(&path) {
            Some(target) => serve(socket, docker, target).await,
            None => reject(socket, &path).await,
        }
    })
}

async fn reject(mut socket: WebSocket, path: &str) {
    tracing::warn!(path, "Rejecting WebSocket on unknown path");
    let frame = CloseFrame {
        code: INVALID_PATH_CLOSE_CODE,
        reason: "Invalid WebSocket path".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Failed to send close frame: {e}");
    }
}

async fn serve(socket: WebSocket, docker: DockerService, target: RelayTarget) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!("Failed to serialize relay message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        if let Err(e) = sender.close().await {
            tracing::debug!("Failed to close WebSocket: {e}");
        }
    });

    // Close and error both end the session; pings are answered by axum.
    let recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket receive error: {e}");
                    break;
                }
            };
            if in_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    relay::run_session(&docker, target, ClientChannel::new(out_tx, in_rx)).await;

    recv_task.abort();
    if let Err(e) = send_task.await {
        tracing::debug!("WebSocket writer task failed: {e}");
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/ws/", get(upgrade))
        .route("/ws/{*path}", get(upgrade))
        .with_state(state)
}
