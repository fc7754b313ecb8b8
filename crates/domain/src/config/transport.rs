use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound a long-poll request waits for the next frame.
    #[serde(default = "d_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Bytes a streaming response may carry before the client is asked to
    /// reconnect with a fresh request.
    #[serde(default = "d_response_limit")]
    pub response_limit: usize,

    /// Serve the WebSocket routes.
    #[serde(default = "d_true")]
    pub websocket: bool,

    /// Largest inbound `xhr_send` body accepted.
    #[serde(default = "d_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: d_poll_timeout_secs(),
            response_limit: d_response_limit(),
            websocket: true,
            max_body_bytes: d_max_body_bytes(),
        }
    }
}

fn d_poll_timeout_secs() -> u64 {
    25
}
fn d_response_limit() -> usize {
    128 * 1024
}
fn d_true() -> bool {
    true
}
fn d_max_body_bytes() -> usize {
    64 * 1024
}
