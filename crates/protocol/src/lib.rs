//! Session frame codec: the wire syntax shared by every transport.
//!
//! | Frame        | Wire form                 |
//! |--------------|---------------------------|
//! | open         | `o`                       |
//! | heartbeat    | `h`                       |
//! | close        | `c[3000,"Go away!"]`      |
//! | message      | `a["m1","m2"]`            |
//! | message blob | emitted verbatim          |
//!
//! Encoding is deterministic and has no knowledge of sessions.  The
//! client-to-server direction carries bare JSON (an array of strings, or a
//! single string over WebSocket) and is parsed by [`decode_client_messages`].

use serde_json::Value;

use tether_domain::error::{Error, Result};

pub const OPEN: &str = "o";
pub const HEARTBEAT: &str = "h";

/// Inbound body was empty.
pub const PAYLOAD_EXPECTED: &str = "Payload expected.";
/// Inbound body was not a JSON string or array of strings.
pub const BROKEN_JSON: &str = "Broken JSON encoding.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Close codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normal server-side close.
pub const CLOSE_GO_AWAY: (u16, &str) = (3000, "Go away!");
/// The application handler failed while the session was opening.
pub const CLOSE_INTERNAL_ERROR: (u16, &str) = (3000, "Internal error");
/// Close initiated by the application itself.
pub const CLOSE_APPLICATION: u16 = 3001;
/// A second transport tried to attach while the session was held.
pub const CLOSE_ANOTHER_CONNECTION: (u16, &str) = (2010, "Another connection still open");
/// The transport dropped without a clean close.
pub const CLOSE_INTERRUPTED: (u16, &str) = (1002, "Connection interrupted");

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Open,
    Close,
    Message,
    MessageBlob,
    Heartbeat,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Message => "message",
            Self::MessageBlob => "message_blob",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of the session wire protocol, in structured form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open,
    Close { code: u16, reason: String },
    /// A batch of application messages, in delivery order.
    Message(Vec<String>),
    /// Already-encoded frame text, passed through unchanged.
    MessageBlob(String),
    Heartbeat,
}

impl Frame {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Open => FrameKind::Open,
            Self::Close { .. } => FrameKind::Close,
            Self::Message(_) => FrameKind::Message,
            Self::MessageBlob(_) => FrameKind::MessageBlob,
            Self::Heartbeat => FrameKind::Heartbeat,
        }
    }

    /// Render the frame in wire syntax.
    pub fn encode(&self) -> String {
        match self {
            Self::Open => OPEN.to_owned(),
            Self::Heartbeat => HEARTBEAT.to_owned(),
            Self::Close { code, reason } => encode_close(*code, reason),
            Self::Message(messages) => encode_messages(messages),
            Self::MessageBlob(blob) => blob.clone(),
        }
    }
}

/// `a` followed by the JSON array of `messages`.
pub fn encode_messages<S: AsRef<str>>(messages: &[S]) -> String {
    let array = Value::Array(
        messages
            .iter()
            .map(|m| Value::String(m.as_ref().to_owned()))
            .collect(),
    );
    format!("a{array}")
}

/// `c[<code>,"<reason>"]` with the reason JSON-escaped.
pub fn encode_close(code: u16, reason: &str) -> String {
    let reason = Value::String(reason.to_owned());
    format!("c[{code},{reason}]")
}

/// Parse wire text back into a [`Frame`].
///
/// A message blob is indistinguishable from a message batch once on the
/// wire, so `a[...]` always decodes to [`Frame::Message`].
pub fn decode(wire: &str) -> Result<Frame> {
    match wire {
        OPEN => return Ok(Frame::Open),
        HEARTBEAT => return Ok(Frame::Heartbeat),
        _ => {}
    }

    if let Some(body) = wire.strip_prefix('a') {
        let messages: Vec<String> = serde_json::from_str(body)
            .map_err(|e| Error::Protocol(format!("message frame: {e}")))?;
        return Ok(Frame::Message(messages));
    }

    if let Some(body) = wire.strip_prefix('c') {
        let (code, reason): (u16, String) = serde_json::from_str(body)
            .map_err(|e| Error::Protocol(format!("close frame: {e}")))?;
        return Ok(Frame::Close { code, reason });
    }

    Err(Error::Protocol(format!(
        "unknown frame prefix in {:?}",
        wire.chars().take(16).collect::<String>()
    )))
}

/// Parse a client payload: a JSON array of strings, or a single JSON
/// string (as WebSocket clients may send).
///
/// Errors carry [`PAYLOAD_EXPECTED`] or [`BROKEN_JSON`] as their message so
/// transports can answer with the conventional text.
pub fn decode_client_messages(body: &str) -> Result<Vec<String>> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::Protocol(PAYLOAD_EXPECTED.into()));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => Ok(vec![s]),
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(Error::Protocol(BROKEN_JSON.into())),
            })
            .collect(),
        _ => Err(Error::Protocol(BROKEN_JSON.into())),
    }
}
