//! HTTP and WebSocket adapters over the session engine.
//!
//! Each adapter attaches to a session through the manager, drains frames
//! with `Session::wait` and feeds inbound payloads through the `remote_*`
//! methods.  The attachment is always released, including when the client
//! disconnects mid-request.

pub mod raw_websocket;
pub mod send;
pub mod streaming;
pub mod websocket;
pub mod xhr;

use std::sync::Arc;

use axum::http::header;
use axum::response::{IntoResponse, Response};

use tether_sessions::{Session, SessionManager};

pub(crate) const CONTENT_TYPE_JS: &str = "application/javascript; charset=UTF-8";

/// Releases the session back to the manager when dropped.
pub(crate) struct Attached {
    manager: SessionManager,
    pub(crate) session: Arc<Session>,
}

impl Attached {
    pub(crate) fn new(manager: &SessionManager, session: Arc<Session>) -> Self {
        Self {
            manager: manager.clone(),
            session,
        }
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.manager.release(&self.session);
    }
}

/// One or more newline-terminated frames in the polling content type.
pub(crate) fn frame_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, CONTENT_TYPE_JS)], body).into_response()
}
