use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use sandpit_runtime::{OutboundFrame, SessionSupervisor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::ApiState;

const INBOUND_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 256;

pub async fn python_session(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| websocket_handler(socket, state.sessions, Some("python")))
}

pub async fn run_session(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| websocket_handler(socket, state.sessions, None))
}

/// Bridges one socket to one supervised session. A single writer task owns
/// the sink; the reader feeds inbound text frames until the client goes
/// away or the session ends.
pub async fn websocket_handler(
    socket: WebSocket,
    sessions: Arc<SessionSupervisor>,
    pinned_language: Option<&'static str>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!("WebSocket send failed: {}", e);
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let reader = async move {
        while let Some(message) = receiver.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            };
            if inbound_tx.send(text).await.is_err() {
                break;
            }
        }
    };

    let session = sessions.supervise(pinned_language, inbound_rx, outbound_tx);
    tokio::pin!(session);

    // When the reader finishes first, dropping its sender is what tells the
    // session the client disconnected.
    let report = tokio::select! {
        report = &mut session => report,
        _ = reader => session.await,
    };

    let _ = writer.await;
    info!(
        "WebSocket session {} closed: {:?} (exit code {:?})",
        report.session_id, report.reason, report.exit_code
    );
}
