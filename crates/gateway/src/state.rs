use std::sync::Arc;

use tether_domain::config::Config;
use tether_sessions::SessionManager;

use crate::app;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: SessionManager,
}

impl AppState {
    /// Build the session manager with the demo handler selected by
    /// `[app] mode`.  The sweeper is not started here.
    pub fn new(config: Arc<Config>) -> Self {
        let manager = app::build_manager(&config);
        Self { config, manager }
    }
}
