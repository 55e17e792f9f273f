use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use orbit_directory::{DirectoryHandle, SocketFrame};

use crate::router::ActorRouter;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn ws_upgrade(
    State(router): State<ActorRouter>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let directory = router.directory().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, directory, params.session_id))
}

/// Drives one client socket. The directory actor owns the registry
/// entry; this task only pumps frames between the actor and the wire.
async fn handle_socket(
    socket: WebSocket,
    directory: DirectoryHandle,
    session_id: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, mut frames) = mpsc::unbounded_channel();

    // Nothing was registered on rejection; close with a policy
    // violation and bail
    let client = match directory.connect(session_id, frames_tx).await {
        Ok(client) => client,
        Err(err) => {
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 1008,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };

    // Forward actor frames to the wire until the channel drains or the
    // actor asks for a close
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame {
                SocketFrame::Event(event) => {
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                SocketFrame::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Clients push nothing meaningful upstream; drain until the socket
    // closes so we notice the disconnect
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("socket for user {} closed", client.user_id);
    directory.disconnect(client.user_id, client.conn_id).await;
}
