//! `POST {prefix}/{server}/{session}/xhr`: one frame per request.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tether_domain::Error;
use tether_protocol::{encode_close, CLOSE_ANOTHER_CONNECTION, CLOSE_GO_AWAY, HEARTBEAT};

use super::{frame_response, Attached};
use crate::state::AppState;

pub async fn xhr(
    State(state): State<AppState>,
    Path((_server, session_id)): Path<(String, String)>,
) -> Response {
    let manager = &state.manager;
    let session = manager.get_or_create(&session_id);

    let attached = match manager.acquire_with(&session_id, true).await {
        Ok(_) => Attached::new(manager, session),
        Err(Error::AlreadyAcquired(_)) => {
            tracing::debug!(session_id = %session_id, "xhr poll rejected, session held");
            let (code, reason) = CLOSE_ANOTHER_CONNECTION;
            return frame_response(format!("{}\n", encode_close(code, reason)));
        }
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "xhr poll on vanished session");
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let poll = Duration::from_secs(state.config.transport.poll_timeout_secs);
    let frame = match tokio::time::timeout(poll, attached.session.wait()).await {
        Ok(Ok((_kind, payload))) => payload,
        Ok(Err(e)) if e.is_end_of_stream() => {
            let (code, reason) = CLOSE_GO_AWAY;
            encode_close(code, reason)
        }
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, error = %e, "xhr poll failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
        Err(_) => HEARTBEAT.to_owned(),
    };
    drop(attached);

    frame_response(format!("{frame}\n"))
}
