//! One client socket, from upgrade through disconnect.
//!
//! 1. Wait for the start message (bounded by the start timeout)
//! 2. Claim the uploaded session it names, or close without a reply
//! 3. Register an outbound queue and start the session coordinator
//! 4. Writer forwards queued frames and pings; reader drains client frames
//! 5. Whichever ends first unregisters the connection

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use roadwatch_core::{ConnectionId, StartMessage, StartRequest};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::connection::{ConnectionHandle, Outbound};
use crate::server::AppState;

/// GET /ws/process
pub async fn ws_process_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_process_socket(socket, state))
}

/// Drive a single `/ws/process` connection.
pub async fn handle_process_socket(socket: WebSocket, state: AppState) {
    let conn_id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let first = tokio::time::timeout(state.start_timeout, ws_rx.next()).await;
    let text = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(other))) => {
            debug!(%conn_id, kind = message_kind(&other), "first frame is not text");
            reject(&mut ws_tx, "expected a start message").await;
            return;
        }
        Ok(Some(Err(e))) => {
            debug!(%conn_id, error = %e, "socket error before start");
            return;
        }
        Ok(None) => {
            debug!(%conn_id, "client left before start");
            return;
        }
        Err(_) => {
            debug!(%conn_id, timeout_secs = state.start_timeout.as_secs(), "no start message");
            reject(&mut ws_tx, "start timeout").await;
            return;
        }
    };

    let StartRequest { session_id, path } = match StartMessage::parse(text.as_str()) {
        Ok(request) => request,
        Err(e) => {
            info!(%conn_id, error = %e, "rejected start message");
            reject(&mut ws_tx, "invalid start message").await;
            return;
        }
    };
    let path = PathBuf::from(path);
    if let Err(e) = state.store.claim(&session_id, &path) {
        info!(%conn_id, %session_id, error = %e, "rejected start message");
        reject(&mut ws_tx, e.to_string()).await;
        return;
    }

    let (handle, rx) = ConnectionHandle::channel(conn_id.clone(), state.max_send_queue);
    if !state.store.register(&session_id, handle) {
        debug!(%conn_id, %session_id, "session vanished before registration");
        reject(&mut ws_tx, "unknown session").await;
        return;
    }
    info!(%conn_id, %session_id, "client connected");
    state.coordinator.start(session_id.clone(), path);

    let mut writer = tokio::spawn(write_outbound(ws_tx, rx, state.heartbeat_interval));

    let reader_conn = conn_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Pong(_) => trace!(conn_id = %reader_conn, "pong"),
                // Only the first message is meaningful; the rest are ignored.
                other => trace!(conn_id = %reader_conn, kind = message_kind(&other), "ignored"),
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let frames_queued = state
        .store
        .unregister(&session_id)
        .map_or(0, |handle| handle.sent_count());
    info!(%conn_id, %session_id, frames_queued, "client disconnected");
}

type WsSink = SplitSink<WebSocket, Message>;

const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

async fn write_outbound(mut ws_tx: WsSink, mut rx: mpsc::Receiver<Outbound>, heartbeat: Duration) {
    let mut ping_interval = tokio::time::interval(heartbeat.max(MIN_HEARTBEAT));
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "close frame not sent");
                    }
                    break;
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Close a socket that never became a session. No data frames are sent.
async fn reject(ws_tx: &mut WsSink, reason: impl Into<Utf8Bytes>) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
        warn!(error = %e, "failed to send close frame");
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}
