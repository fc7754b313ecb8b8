use serde::Serialize;

/// Structured trace events emitted across all tether crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        timeout_ms: i64,
    },
    SessionAcquired {
        session_id: String,
        heartbeat: bool,
        first_attach: bool,
    },
    SessionReleased {
        session_id: String,
    },
    SessionClosed {
        session_id: String,
        interrupted: bool,
        pending_frames: usize,
    },
    SessionEvicted {
        session_id: String,
        reason: EvictReason,
    },
    HandlerFault {
        session_id: String,
        message_kind: String,
        error: String,
    },
    Broadcast {
        recipients: usize,
        payload_chars: usize,
    },
    SweepCompleted {
        scanned: usize,
        expired: usize,
        evicted: usize,
        remaining: usize,
    },
}

/// Why the sweep dropped a session from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictReason {
    /// Idle past its expiry with no transport attached.
    Expired,
    /// Still attached, but past expiry by more than the grace margin.
    AcquiredPastGrace,
    /// Shut down through `clear()`.
    Cleared,
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tether_event");
    }
}
