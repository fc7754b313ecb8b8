//! `POST {prefix}/{server}/{session}/xhr_streaming`: frames written to one
//! chunked response until it has carried `response_limit` bytes.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use tether_domain::Error;
use tether_protocol::{encode_close, FrameKind, CLOSE_ANOTHER_CONNECTION};

use super::{Attached, CONTENT_TYPE_JS};
use crate::state::AppState;

/// Some user agents buffer the first 2 KiB of a streamed response.
pub(crate) fn prelude() -> String {
    let mut pad = "h".repeat(2048);
    pad.push('\n');
    pad
}

pub async fn xhr_streaming(
    State(state): State<AppState>,
    Path((_server, session_id)): Path<(String, String)>,
) -> Response {
    let manager = state.manager.clone();
    let session = manager.get_or_create(&session_id);
    let limit = state.config.transport.response_limit;

    let attached = match manager.acquire_with(&session_id, true).await {
        Ok(_) => Attached::new(&manager, session),
        Err(Error::AlreadyAcquired(_)) => {
            let (code, reason) = CLOSE_ANOTHER_CONNECTION;
            let body = format!("{}{}\n", prelude(), encode_close(code, reason));
            return ([(header::CONTENT_TYPE, CONTENT_TYPE_JS)], body).into_response();
        }
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };

    let stream = async_stream::stream! {
        // Owned by the stream so a client disconnect releases the session.
        let attached = attached;
        yield Ok::<_, Infallible>(prelude());

        let mut written = 0usize;
        loop {
            match attached.session.wait().await {
                Ok((kind, payload)) => {
                    written += payload.len() + 1;
                    yield Ok(format!("{payload}\n"));
                    if kind == FrameKind::Close || written >= limit {
                        break;
                    }
                }
                Err(e) => {
                    if !e.is_end_of_stream() {
                        tracing::warn!(session_id = %attached.session.id(), error = %e, "streaming drain failed");
                    }
                    break;
                }
            }
        }
        tracing::debug!(session_id = %attached.session.id(), written, "streaming response finished");
    };

    (
        [(header::CONTENT_TYPE, CONTENT_TYPE_JS)],
        Body::from_stream(stream),
    )
        .into_response()
}
