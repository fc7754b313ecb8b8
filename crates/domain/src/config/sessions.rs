use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upper bound for every session timing value (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Construction parameters for the session manager: expiry, sweep
/// cadence, and heartbeat behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle interval added to a session's expiry on every tick.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,

    /// Period of the background sweep that expires and evicts sessions.
    #[serde(default = "d_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Emit heartbeat frames to transports that carry them.
    #[serde(default = "d_true")]
    pub heartbeat: bool,

    /// Period of the heartbeat timer (only used when `heartbeat = true`).
    #[serde(default = "d_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long past its expiry an *acquired* session may linger before
    /// the sweep force-closes it out from under its transport.
    #[serde(default = "d_acquired_grace_secs")]
    pub acquired_grace_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout_secs(),
            gc_interval_secs: d_gc_interval_secs(),
            heartbeat: true,
            heartbeat_interval_secs: d_heartbeat_interval_secs(),
            acquired_grace_secs: d_acquired_grace_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout_secs() -> u64 {
    5
}
fn d_gc_interval_secs() -> u64 {
    5
}
fn d_heartbeat_interval_secs() -> u64 {
    25
}
fn d_acquired_grace_secs() -> u64 {
    60
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: SessionsConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.gc_interval_secs, 5);
        assert!(cfg.heartbeat);
        assert_eq!(cfg.heartbeat_interval_secs, 25);
        assert_eq!(cfg.acquired_grace_secs, 60);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg: SessionsConfig = toml::from_str("heartbeat = false\ntimeout_secs = 30").unwrap();
        assert!(!cfg.heartbeat);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.gc_interval_secs, 5);
    }
}
