//! One server-side mailbox, independent of any single transport attachment.
//!
//! Producers (`send`, heartbeats, lifecycle transitions) push frames onto an
//! ordered queue; the attached transport drains it through [`Session::wait`],
//! which parks until something is queued or the session closes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use tether_domain::error::{Error, Result};
use tether_domain::trace::TraceEvent;
use tether_protocol::{Frame, FrameKind, CLOSE_GO_AWAY, CLOSE_INTERNAL_ERROR};

use crate::handler::{self, SessionHandler, SessionMessage};
use crate::manager::{SessionManager, Shared};

/// Idle interval used when a session is built without an explicit timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a session.  `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Open,
    Closing,
    Closed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Session {
    id: String,
    handler: Arc<dyn SessionHandler>,
    inner: Mutex<Inner>,
    next_waiter: AtomicU64,
}

struct Inner {
    state: SessionState,
    timeout: chrono::Duration,
    expires: DateTime<Utc>,
    expired: bool,
    /// Never holds two adjacent `Frame::Message` entries.
    queue: VecDeque<Frame>,
    /// Set only while the queue is empty and a consumer is parked in `wait`.
    waiter: Option<Waiter>,
    acquired: bool,
    heartbeat_transport: bool,
    interrupted: bool,
    hits: u64,
    heartbeats: u64,
    manager: Option<Weak<Shared>>,
}

struct Waiter {
    id: u64,
    wake: oneshot::Sender<()>,
}

impl Session {
    /// Build a session with the default 10 second timeout.
    pub fn new(id: impl Into<String>, handler: Arc<dyn SessionHandler>) -> Arc<Self> {
        Self::with_timeout(id, handler, DEFAULT_TIMEOUT)
    }

    /// Build a session with a random UUID id.
    pub fn generate(handler: Arc<dyn SessionHandler>) -> Arc<Self> {
        Self::new(uuid::Uuid::new_v4().to_string(), handler)
    }

    pub fn with_timeout(
        id: impl Into<String>,
        handler: Arc<dyn SessionHandler>,
        timeout: Duration,
    ) -> Arc<Self> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        Arc::new(Self {
            id: id.into(),
            handler,
            inner: Mutex::new(Inner {
                state: SessionState::New,
                timeout,
                expires: deadline(Utc::now(), timeout),
                expired: false,
                queue: VecDeque::new(),
                waiter: None,
                acquired: false,
                heartbeat_transport: false,
                interrupted: false,
                hits: 0,
                heartbeats: 0,
                manager: None,
            }),
            next_waiter: AtomicU64::new(0),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.inner.lock().expires
    }

    pub fn timeout(&self) -> Duration {
        self.inner.lock().timeout.to_std().unwrap_or(Duration::MAX)
    }

    /// Marked for collection.  Distinct from `state() == Closed`: the sweep
    /// may see an expired session before its closing transition has run.
    pub fn expired(&self) -> bool {
        self.inner.lock().expired
    }

    /// The handler failed while opening, or the remote closed with an error.
    pub fn interrupted(&self) -> bool {
        self.inner.lock().interrupted
    }

    pub fn is_acquired(&self) -> bool {
        self.inner.lock().acquired
    }

    /// Whether the attached transport expects heartbeat frames.
    pub fn heartbeat_transport(&self) -> bool {
        self.inner.lock().heartbeat_transport
    }

    pub fn hits(&self) -> u64 {
        self.inner.lock().hits
    }

    pub fn heartbeats(&self) -> u64 {
        self.inner.lock().heartbeats
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Snapshot of the undelivered frames, head first.
    pub fn pending(&self) -> Vec<Frame> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    pub fn has_waiter(&self) -> bool {
        self.inner.lock().waiter.is_some()
    }

    /// The owning manager, while one is registered.
    pub fn manager(&self) -> Option<SessionManager> {
        let weak = self.inner.lock().manager.clone()?;
        SessionManager::from_weak(&weak)
    }

    pub(crate) fn set_manager(&self, manager: Weak<Shared>) {
        self.inner.lock().manager = Some(manager);
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Mark the session for collection.  Does not change `state`.
    pub fn expire(&self) {
        self.inner.lock().expired = true;
    }

    /// Push the expiry forward by `timeout`, or by the session's own
    /// timeout when `None`.
    pub fn tick(&self, timeout: Option<Duration>) {
        self.tick_at(Utc::now(), timeout);
    }

    pub(crate) fn tick_at(&self, now: DateTime<Utc>, timeout: Option<Duration>) {
        let mut inner = self.inner.lock();
        let delta = match timeout {
            Some(t) => chrono::Duration::from_std(t).unwrap_or(chrono::Duration::MAX),
            None => inner.timeout,
        };
        inner.expires = deadline(now, delta);
    }

    /// Count a heartbeat and keep the session alive; queue an `h` frame
    /// only if the attached transport carries heartbeats.
    pub fn heartbeat(&self) {
        let mut inner = self.inner.lock();
        inner.heartbeats += 1;
        inner.expires = deadline(Utc::now(), inner.timeout);
        if inner.heartbeat_transport {
            push(&mut inner, Frame::Heartbeat);
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Queue one application message.  A no-op unless the session is open.
    pub fn send(&self, message: &str) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Open {
            return;
        }
        inner.expires = deadline(Utc::now(), inner.timeout);
        push(&mut inner, Frame::Message(vec![message.to_owned()]));
    }

    /// Like [`send`](Self::send) for raw bytes, which must be UTF-8 text.
    pub fn send_bytes(&self, message: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(message).map_err(|e| {
            Error::InvalidArgument(format!("session {}: message is not text: {e}", self.id))
        })?;
        self.send(text);
        Ok(())
    }

    /// Queue a pre-encoded frame verbatim.  Same gating as `send`.
    pub fn send_frame(&self, frame: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Open {
            return;
        }
        inner.expires = deadline(Utc::now(), inner.timeout);
        push(&mut inner, Frame::MessageBlob(frame.into()));
    }

    /// Enqueue a frame regardless of state, merging message batches.
    pub fn feed(&self, frame: Frame) {
        push(&mut self.inner.lock(), frame);
    }

    /// Begin a server-side close.  Idempotent once closing.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        inner.state = SessionState::Closing;
        push(&mut inner, Frame::close(CLOSE_GO_AWAY.0, CLOSE_GO_AWAY.1));
        tracing::debug!(session_id = %self.id, "session closing");
    }

    /// Drain the next frame in wire syntax.
    pub async fn wait(&self) -> Result<(FrameKind, String)> {
        let frame = self.wait_raw().await?;
        Ok((frame.kind(), frame.encode()))
    }

    /// Drain the next frame in structured form, for transports that
    /// re-serialize themselves.
    ///
    /// Suspends while the queue is empty; fails with `SessionClosed` once
    /// the session is closed and drained.  Only one consumer may wait at a
    /// time.  Dropping the returned future deregisters the waiter.
    pub async fn wait_raw(&self) -> Result<Frame> {
        loop {
            let (waiter_id, woken) = {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.queue.pop_front() {
                    return Ok(frame);
                }
                if inner.state == SessionState::Closed {
                    return Err(Error::SessionClosed(self.id.clone()));
                }
                if inner.waiter.as_ref().is_some_and(|w| !w.wake.is_closed()) {
                    return Err(Error::Other(format!(
                        "session {}: another consumer is already waiting",
                        self.id
                    )));
                }
                let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
                let (wake, woken) = oneshot::channel();
                inner.waiter = Some(Waiter { id, wake });
                (id, woken)
            };

            let _registration = WaiterRegistration {
                session: self,
                id: waiter_id,
            };
            // A dropped sender also counts as a wake-up: re-examine the queue.
            let _ = woken.await;
        }
    }

    // ── Transport attachment ─────────────────────────────────────────

    /// Attach a transport.  The first attachment opens the session, queues
    /// the `o` frame and tells the handler; if the handler fails the
    /// session is interrupted and starts closing.
    pub async fn acquire(self: &Arc<Self>, manager: &SessionManager, heartbeat: bool) {
        let opening = {
            let mut inner = self.inner.lock();
            // Evicted between the registry lock and here; nothing to attach to.
            if inner.state == SessionState::Closed {
                return;
            }
            inner.acquired = true;
            inner.manager = Some(manager.downgrade());
            inner.heartbeat_transport = heartbeat;
            inner.expires = deadline(Utc::now(), inner.timeout);
            inner.hits += 1;

            if inner.state == SessionState::New {
                inner.state = SessionState::Open;
                push(&mut inner, Frame::Open);
                true
            } else {
                false
            }
        };

        if !opening {
            return;
        }

        tracing::info!(session_id = %self.id, "session opened");
        if self.dispatch(SessionMessage::Open).await.is_err() {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Closed {
                inner.state = SessionState::Closing;
                inner.interrupted = true;
                push(
                    &mut inner,
                    Frame::close(CLOSE_INTERNAL_ERROR.0, CLOSE_INTERNAL_ERROR.1),
                );
            }
        }
    }

    /// Detach the transport.  Leaves the session open for the next one.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.acquired = false;
        inner.manager = None;
        inner.heartbeat_transport = false;
    }

    // ── Inbound ──────────────────────────────────────────────────────

    pub async fn remote_message(self: &Arc<Self>, message: String) {
        let _ = self.dispatch(SessionMessage::Message(message)).await;
    }

    /// Deliver each message in order; a failing message does not stop the
    /// rest of the batch.
    pub async fn remote_messages<I>(self: &Arc<Self>, messages: I)
    where
        I: IntoIterator<Item = String>,
    {
        for message in messages {
            let _ = self.dispatch(SessionMessage::Message(message)).await;
        }
    }

    /// The remote side is going away, with the transport error if any.
    pub async fn remote_close(self: &Arc<Self>, error: Option<String>) {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
                return;
            }
            inner.state = SessionState::Closing;
            if error.is_some() {
                inner.interrupted = true;
            }
        }
        tracing::info!(
            session_id = %self.id,
            error = error.as_deref().unwrap_or("none"),
            "session closing by remote"
        );
        let _ = self.dispatch(SessionMessage::Close(error)).await;
    }

    /// Terminal transition.  Wakes a parked consumer so it can flush what
    /// is left in the queue and then observe end of stream.
    pub async fn remote_closed(self: &Arc<Self>) {
        let (interrupted, pending_frames) = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Closed;
            inner.expired = true;
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.wake.send(());
            }
            (inner.interrupted, inner.queue.len())
        };

        tracing::info!(session_id = %self.id, pending_frames, "session closed");
        TraceEvent::SessionClosed {
            session_id: self.id.clone(),
            interrupted,
            pending_frames,
        }
        .emit();

        let _ = self.dispatch(SessionMessage::Closed).await;
    }

    async fn dispatch(self: &Arc<Self>, message: SessionMessage) -> std::result::Result<(), String> {
        handler::invoke(&self.handler, message, Arc::clone(self)).await
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state;
    }

    #[cfg(test)]
    pub(crate) fn set_counters(&self, hits: u64, heartbeats: u64) {
        let mut inner = self.inner.lock();
        inner.hits = hits;
        inner.heartbeats = heartbeats;
    }

    #[cfg(test)]
    pub(crate) fn set_heartbeat_transport(&self, on: bool) {
        self.inner.lock().heartbeat_transport = on;
    }
}

/// The single enqueue primitive: merge into a trailing message batch or
/// push a new entry, then wake the parked consumer.
fn push(inner: &mut Inner, frame: Frame) {
    let unmerged = match (inner.queue.back_mut(), frame) {
        (Some(Frame::Message(batch)), Frame::Message(more)) => {
            batch.extend(more);
            None
        }
        (_, frame) => Some(frame),
    };
    if let Some(frame) = unmerged {
        inner.queue.push_back(frame);
    }
    if let Some(waiter) = inner.waiter.take() {
        let _ = waiter.wake.send(());
    }
}

fn deadline(now: DateTime<Utc>, timeout: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(timeout)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Clears the waiter slot when a `wait` is woken or abandoned.
struct WaiterRegistration<'a> {
    session: &'a Session,
    id: u64,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.inner.lock();
        if inner.waiter.as_ref().is_some_and(|w| w.id == self.id) {
            inner.waiter = None;
        }
    }
}

impl fmt::Display for Session {
    /// `id='abc' connected acquired queue[2] hits=3 heartbeats=1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        write!(f, "id='{}'", self.id)?;
        f.write_str(match inner.state {
            SessionState::Open => " connected",
            SessionState::Closed => " closed",
            SessionState::New | SessionState::Closing => " disconnected",
        })?;
        if inner.acquired {
            f.write_str(" acquired")?;
        }
        if !inner.queue.is_empty() {
            write!(f, " queue[{}]", inner.queue.len())?;
        }
        if inner.hits > 0 {
            write!(f, " hits={}", inner.hits)?;
        }
        if inner.heartbeats > 0 {
            write!(f, " heartbeats={}", inner.heartbeats)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("expires", &inner.expires)
            .field("expired", &inner.expired)
            .field("acquired", &inner.acquired)
            .field("queue", &inner.queue.len())
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
