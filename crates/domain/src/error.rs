/// Shared error type used across all tether crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A caller handed over a value the operation cannot accept
    /// (e.g. a non-UTF-8 payload for `send_bytes`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session not found: {0}")]
    NotFound(String),

    /// A different session is already registered under this id.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session already expired: {0}")]
    AlreadyExpired(String),

    #[error("session already acquired: {0}")]
    AlreadyAcquired(String),

    /// End of stream: the session is closed and its queue is drained.
    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// `true` for the normal end-of-stream signal a draining transport
    /// receives once the session has nothing more to deliver.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
