//! `GET {prefix}/{server}/{session}/websocket`: framed WebSocket transport.
//!
//! Flow:
//! 1. Upgrade, then attach to the session (creating it if needed)
//! 2. Writer task drains `Session::wait` into text frames
//! 3. Reader loop decodes client payloads into `remote_messages`
//! 4. Whichever side ends first tears the session down

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};

use tether_domain::Error;
use tether_protocol::{decode_client_messages, encode_close, FrameKind, CLOSE_ANOTHER_CONNECTION};
use tether_sessions::Session;

use super::Attached;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((_server, session_id)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let manager = state.manager.clone();
    let session = manager.get_or_create(&session_id);
    let (mut ws_sink, mut ws_stream) = socket.split();

    let attached = match manager.acquire_with(&session_id, true).await {
        Ok(_) => Attached::new(&manager, session.clone()),
        Err(Error::AlreadyAcquired(_)) => {
            let (code, reason) = CLOSE_ANOTHER_CONNECTION;
            let _ = ws_sink.send(Message::Text(encode_close(code, reason))).await;
            let _ = ws_sink.close().await;
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "websocket attach failed");
            return;
        }
    };
    tracing::info!(session_id = %session_id, "websocket attached");

    // Writer task: forwards queued frames to the socket.
    let outbound = session.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            match outbound.wait().await {
                Ok((kind, payload)) => {
                    if ws_sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                    if kind == FrameKind::Close {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = ws_sink.close().await;
    });

    let error = tokio::select! {
        error = read_loop(&session, &mut ws_stream) => error,
        _ = &mut writer => None,
    };
    writer.abort();

    session.remote_close(error).await;
    session.remote_closed().await;
    drop(attached);
    tracing::info!(session_id = %session_id, "websocket detached");
}

/// Feed inbound text into the session until the peer goes away.  Returns
/// the transport error, if the socket did not close cleanly.
async fn read_loop(session: &Arc<Session>, stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match decode_client_messages(&text) {
                Ok(messages) => session.remote_messages(messages).await,
                Err(e) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "dropping malformed websocket payload");
                    return Some(e.to_string());
                }
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => return Some(e.to_string()),
        }
    }
    None
}
