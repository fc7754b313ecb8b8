//! The application boundary: events a session delivers to user code.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use tether_domain::trace::TraceEvent;

use crate::session::Session;

/// An event delivered to the application handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// The session was attached for the first time and is now open.
    Open,
    /// One inbound application message.
    Message(String),
    /// The remote side is closing; carries the transport error, if any.
    Close(Option<String>),
    /// The session reached its terminal state.
    Closed,
}

impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Close(_) => "close",
            Self::Closed => "closed",
        }
    }
}

/// Application callback invoked for every [`SessionMessage`].
///
/// Errors and panics are caught at the call site and never propagate past
/// the session.
#[async_trait::async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle(&self, message: SessionMessage, session: Arc<Session>) -> anyhow::Result<()>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> SessionHandler for FnHandler<F>
where
    F: Fn(SessionMessage, Arc<Session>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: SessionMessage, session: Arc<Session>) -> anyhow::Result<()> {
        (self.0)(message, session).await
    }
}

/// Wrap an async closure as a shared handler.
///
/// ```ignore
/// let handler = handler_fn(|msg, session| async move {
///     if let SessionMessage::Message(text) = msg {
///         session.send(&text);
///     }
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn SessionHandler>
where
    F: Fn(SessionMessage, Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Run the handler with fault isolation.  Returns the rendered failure
/// (error chain or panic payload) so callers can apply state transitions.
pub(crate) async fn invoke(
    handler: &Arc<dyn SessionHandler>,
    message: SessionMessage,
    session: Arc<Session>,
) -> Result<(), String> {
    let kind = message.kind();
    let session_id = session.id().to_owned();

    let outcome = AssertUnwindSafe(handler.handle(message, session))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{e:#}"),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            format!("handler panicked: {detail}")
        }
    };

    tracing::error!(
        session_id = %session_id,
        message_kind = kind,
        error = %error,
        "session handler failed"
    );
    TraceEvent::HandlerFault {
        session_id,
        message_kind: kind.to_owned(),
        error: error.clone(),
    }
    .emit();

    Err(error)
}
