use serde::{Deserialize, Serialize};

/// The demo application wired behind every session by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: AppMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// Every inbound message is sent back to the session it came from.
    #[default]
    Echo,
    /// Every inbound message is fanned out to all open sessions.
    Broadcast,
}
