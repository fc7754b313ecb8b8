//! `POST {prefix}/{server}/{session}/xhr_send`: client-to-server messages
//! for the polling and streaming transports.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tether_domain::Error;
use tether_protocol::decode_client_messages;

use crate::state::AppState;

pub async fn xhr_send(
    State(state): State<AppState>,
    Path((_server, session_id)): Path<(String, String)>,
    body: String,
) -> Response {
    let Some(session) = state.manager.find(&session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    let messages = match decode_client_messages(&body) {
        Ok(messages) => messages,
        Err(Error::Protocol(reason)) => {
            tracing::debug!(session_id = %session_id, reason = %reason, "rejected xhr_send body");
            return (StatusCode::INTERNAL_SERVER_ERROR, reason).into_response();
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    session.tick(None);
    session.remote_messages(messages).await;
    StatusCode::NO_CONTENT.into_response()
}
