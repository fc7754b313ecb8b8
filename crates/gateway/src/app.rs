//! Demo applications wired behind the session endpoints.
//!
//! - `echo`: every inbound message is sent back to the same session.
//! - `broadcast`: every inbound message is fanned out to all open sessions.

use std::sync::{Arc, OnceLock};

use tether_domain::config::{AppMode, Config};
use tether_sessions::{
    handler_fn, Session, SessionHandler, SessionManager, SessionMessage, WeakSessionManager,
};

pub fn build_manager(config: &Config) -> SessionManager {
    match config.app.mode {
        AppMode::Echo => SessionManager::new(config.sessions.clone(), echo()),
        AppMode::Broadcast => {
            let handler = Arc::new(Broadcaster::default());
            let manager = SessionManager::new(config.sessions.clone(), handler.clone());
            handler.bind(&manager);
            manager
        }
    }
}

pub fn echo() -> Arc<dyn SessionHandler> {
    handler_fn(|msg, session| async move {
        if let SessionMessage::Message(text) = msg {
            session.send(&text);
        }
        Ok(())
    })
}

/// Relays each inbound message to every open session of its manager.
#[derive(Default)]
pub struct Broadcaster {
    manager: OnceLock<WeakSessionManager>,
}

impl Broadcaster {
    pub fn bind(&self, manager: &SessionManager) {
        if self.manager.set(manager.weak()).is_err() {
            tracing::warn!("broadcaster already bound to a manager");
        }
    }
}

#[async_trait::async_trait]
impl SessionHandler for Broadcaster {
    async fn handle(&self, message: SessionMessage, session: Arc<Session>) -> anyhow::Result<()> {
        let text = match message {
            SessionMessage::Message(text) => text,
            other => {
                tracing::debug!(session_id = %session.id(), kind = other.kind(), "broadcast app event");
                return Ok(());
            }
        };
        let manager = self
            .manager
            .get()
            .and_then(WeakSessionManager::upgrade)
            .ok_or_else(|| anyhow::anyhow!("broadcaster is not bound to a live manager"))?;
        let recipients = manager.broadcast(&text);
        tracing::debug!(session_id = %session.id(), recipients, "relayed message");
        Ok(())
    }
}
