//! `GET {prefix}/websocket`: unframed WebSocket.  Each application message
//! travels as one text frame; no open, heartbeat or close frames.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use tether_protocol::{decode, Frame};

use super::Attached;
use crate::state::AppState;

pub async fn raw_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Flatten a queued frame into the application messages it carries.
fn unframe(frame: Frame) -> Option<Vec<String>> {
    match frame {
        Frame::Message(messages) => Some(messages),
        Frame::MessageBlob(blob) => match decode(&blob) {
            Ok(Frame::Message(messages)) => Some(messages),
            _ => None,
        },
        Frame::Open | Frame::Heartbeat | Frame::Close { .. } => None,
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let manager = state.manager.clone();
    let session = manager.get_or_create(&uuid::Uuid::new_v4().to_string());
    let attached = match manager.acquire_with(session.id(), false).await {
        Ok(s) => Attached::new(&manager, s),
        Err(e) => {
            tracing::warn!(session_id = %session.id(), error = %e, "raw websocket attach failed");
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();

    let outbound = session.clone();
    let mut writer = tokio::spawn(async move {
        while let Ok(frame) = outbound.wait_raw().await {
            if matches!(frame, Frame::Close { .. }) {
                break;
            }
            for text in unframe(frame).unwrap_or_default() {
                if ws_sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    let error = tokio::select! {
        error = async {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => session.remote_message(text).await,
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => {}
                    Err(e) => return Some(e.to_string()),
                }
            }
            None
        } => error,
        _ = &mut writer => None,
    };
    writer.abort();

    session.remote_close(error).await;
    session.remote_closed().await;
    drop(attached);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unframe_keeps_only_messages() {
        assert_eq!(
            unframe(Frame::Message(vec!["a".into(), "b".into()])),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            unframe(Frame::MessageBlob(r#"a["x"]"#.into())),
            Some(vec!["x".to_string()])
        );
        assert_eq!(unframe(Frame::Open), None);
        assert_eq!(unframe(Frame::Heartbeat), None);
        assert_eq!(unframe(Frame::close(3000, "Go away!")), None);
    }
}
