//! Registry of live sessions keyed by id.
//!
//! The manager owns the `pool` of sessions and the `acquired` set that gives
//! one transport at a time exclusive use of a session.  Every registry edit,
//! including the background sweep, goes through the same mutex; session
//! methods that call into the application handler always run after that
//! lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tether_domain::config::{SessionsConfig, MAX_INTERVAL_SECS};
use tether_domain::error::{Error, Result};
use tether_domain::trace::{EvictReason, TraceEvent};
use tether_protocol::encode_messages;

use crate::handler::SessionHandler;
use crate::session::{Session, SessionState};

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) pool: HashMap<String, Arc<Session>>,
    /// Always a subset of `pool`.
    pub(crate) acquired: HashMap<String, Arc<Session>>,
}

pub(crate) struct Shared {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) config: SessionsConfig,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Cheaply cloneable handle to one session registry.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) shared: Arc<Shared>,
}

/// Non-owning handle, for handlers that need to reach back into the
/// manager they are registered with.
#[derive(Clone)]
pub struct WeakSessionManager(Weak<Shared>);

impl WeakSessionManager {
    pub fn upgrade(&self) -> Option<SessionManager> {
        SessionManager::from_weak(&self.0)
    }
}

impl SessionManager {
    /// `handler` is bound to every session created through
    /// [`get_or_create`](Self::get_or_create).
    pub fn new(config: SessionsConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                handler,
                config,
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    pub fn weak(&self) -> WeakSessionManager {
        WeakSessionManager(self.downgrade())
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.shared.config
    }

    /// Session timeout applied to sessions the manager creates.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.config.timeout_secs)
    }

    /// Two handles are the same manager when they share one registry.
    pub fn same_as(&self, other: &SessionManager) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register an existing session.  An expired session is rejected: ids
    /// are never reused once evicted.  A different session already pooled
    /// under the same id is left in place and the call fails with
    /// `AlreadyExists`; re-adding the pooled session itself is a no-op.
    pub fn add(&self, session: Arc<Session>) -> Result<Arc<Session>> {
        if session.expired() {
            return Err(Error::AlreadyExpired(session.id().to_owned()));
        }
        {
            let mut registry = self.shared.registry.lock();
            match registry.pool.get(session.id()) {
                Some(existing) if Arc::ptr_eq(existing, &session) => return Ok(session),
                Some(_) => return Err(Error::AlreadyExists(session.id().to_owned())),
                None => {
                    registry
                        .pool
                        .insert(session.id().to_owned(), session.clone());
                }
            }
        }
        self.registered(&session);
        Ok(session)
    }

    fn registered(&self, session: &Session) {
        session.set_manager(self.downgrade());
        tracing::debug!(session_id = %session.id(), "session registered");
        TraceEvent::SessionCreated {
            session_id: session.id().to_owned(),
            timeout_ms: session.timeout().as_millis() as i64,
        }
        .emit();
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.find(id).ok_or_else(|| Error::NotFound(id.to_owned()))
    }

    /// Lookup without failing; pair with `unwrap_or` for a default.
    pub fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.shared.registry.lock().pool.get(id).cloned()
    }

    /// Return the pooled session, creating it with the default handler and
    /// the configured timeout if absent.  Lookup and insert are atomic.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let session = {
            let mut registry = self.shared.registry.lock();
            if let Some(existing) = registry.pool.get(id) {
                return existing.clone();
            }
            let session = Session::with_timeout(
                id,
                self.shared.handler.clone(),
                self.session_timeout(),
            );
            registry.pool.insert(id.to_owned(), session.clone());
            session
        };
        self.registered(&session);
        session
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.registry.lock().pool.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shared.registry.lock().pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.lock().pool.is_empty()
    }

    /// Snapshot of every pooled session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.shared.registry.lock().pool.values().cloned().collect()
    }

    /// Pooled sessions not yet marked expired.  Each call takes a fresh
    /// snapshot; the iterator itself holds no lock.
    pub fn active_sessions(&self) -> impl Iterator<Item = Arc<Session>> {
        self.sessions().into_iter().filter(|s| !s.expired())
    }

    // ── Exclusive acquisition ────────────────────────────────────────

    /// Attach a transport using the manager's heartbeat setting.
    pub async fn acquire(&self, id: &str) -> Result<Arc<Session>> {
        self.acquire_with(id, self.shared.config.heartbeat).await
    }

    /// Attach a transport to `id`.  At most one holder at a time: a second
    /// attach fails with `AlreadyAcquired` until [`release`](Self::release).
    ///
    /// `heartbeat` states whether this transport wants `h` frames; it is
    /// ignored when heartbeats are disabled for the manager.
    pub async fn acquire_with(&self, id: &str, heartbeat: bool) -> Result<Arc<Session>> {
        let session = {
            let mut registry = self.shared.registry.lock();
            let session = registry
                .pool
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.to_owned()))?;
            if registry.acquired.contains_key(id) {
                return Err(Error::AlreadyAcquired(id.to_owned()));
            }
            registry.acquired.insert(id.to_owned(), session.clone());
            session
        };

        let heartbeat = heartbeat && self.shared.config.heartbeat;
        session.acquire(self, heartbeat).await;

        tracing::debug!(session_id = %id, hits = session.hits(), "session acquired");
        TraceEvent::SessionAcquired {
            session_id: id.to_owned(),
            heartbeat,
            first_attach: session.hits() == 1,
        }
        .emit();
        Ok(session)
    }

    /// Detach the current holder.  Does not close the session.
    pub fn release(&self, session: &Session) {
        let held = self
            .shared
            .registry
            .lock()
            .acquired
            .remove(session.id())
            .is_some();
        if !held {
            return;
        }
        session.release();
        tracing::debug!(session_id = %session.id(), "session released");
        TraceEvent::SessionReleased {
            session_id: session.id().to_owned(),
        }
        .emit();
    }

    pub fn is_acquired(&self, id: &str) -> bool {
        self.shared.registry.lock().acquired.contains_key(id)
    }

    // ── Fan-out and shutdown ─────────────────────────────────────────

    /// Deliver one message to every pooled session in the OPEN state,
    /// including ones marked expired but not yet swept.  The frame is
    /// encoded once and queued verbatim.  Returns the number of recipients.
    pub fn broadcast(&self, message: &str) -> usize {
        let blob = encode_messages(&[message]);
        let mut recipients = 0;
        for session in self.sessions() {
            if session.state() == SessionState::Open {
                session.send_frame(blob.clone());
                recipients += 1;
            }
        }
        TraceEvent::Broadcast {
            recipients,
            payload_chars: message.chars().count(),
        }
        .emit();
        recipients
    }

    /// Force every session to its terminal state and empty the registry.
    pub async fn clear(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut registry = self.shared.registry.lock();
            registry.acquired.clear();
            registry.pool.drain().map(|(_, s)| s).collect()
        };

        tracing::info!(sessions = drained.len(), "clearing session registry");
        for session in drained {
            session.release();
            session.remote_closed().await;
            TraceEvent::SessionEvicted {
                session_id: session.id().to_owned(),
                reason: EvictReason::Cleared,
            }
            .emit();
        }
    }

    // ── Background task ──────────────────────────────────────────────

    /// Spawn the sweep/heartbeat task on the current tokio runtime.  A
    /// second call while running is a no-op.
    pub fn start(&self) {
        let mut sweeper = self.shared.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_background(
            self.downgrade(),
            self.shared.config.clone(),
            token.clone(),
        ));
        *sweeper = Some((token, handle));
        tracing::info!(
            gc_interval_secs = self.shared.config.gc_interval_secs,
            heartbeat = self.shared.config.heartbeat,
            "session sweeper started"
        );
    }

    /// Cancel the background task and wait for it to finish.  No-op when
    /// not running.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.shared.sweeper.lock().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "session sweeper ended abnormally");
        }
        tracing::info!("session sweeper stopped");
    }

    /// `true` while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.shared
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.registry.lock();
        f.debug_struct("SessionManager")
            .field("sessions", &registry.pool.len())
            .field("acquired", &registry.acquired.len())
            .finish()
    }
}

/// Holds only a weak reference so dropping every manager handle ends the
/// task even without `stop()`.
async fn run_background(manager: Weak<Shared>, config: SessionsConfig, token: CancellationToken) {
    let gc_every = period(config.gc_interval_secs);
    let hb_every = period(config.heartbeat_interval_secs);
    let start = tokio::time::Instant::now();
    let mut gc = tokio::time::interval_at(first_tick(start, gc_every), gc_every);
    let mut hb = tokio::time::interval_at(first_tick(start, hb_every), hb_every);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = gc.tick() => {
                let Some(manager) = SessionManager::from_weak(&manager) else { break };
                manager.sweep().await;
            }
            _ = hb.tick(), if config.heartbeat => {
                let Some(manager) = SessionManager::from_weak(&manager) else { break };
                manager.heartbeat_acquired();
            }
        }
    }
}

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(1, MAX_INTERVAL_SECS))
}

fn first_tick(start: tokio::time::Instant, every: Duration) -> tokio::time::Instant {
    start.checked_add(every).unwrap_or(start)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SessionMessage;
    use crate::testing::Recorder;
    use tether_protocol::Frame;

    fn manager() -> (SessionManager, Arc<Recorder>) {
        let recorder = Recorder::new();
        (
            SessionManager::new(SessionsConfig::default(), recorder.clone()),
            recorder,
        )
    }

    #[test]
    fn fresh_add_registers() {
        let (sm, recorder) = manager();
        assert!(sm.is_empty());

        let s = Session::new("test", recorder);
        let added = sm.add(s.clone()).unwrap();

        assert!(Arc::ptr_eq(&added, &s));
        assert!(sm.contains("test"));
        assert!(Arc::ptr_eq(&sm.get("test").unwrap(), &s));
        assert!(s.manager().unwrap().same_as(&sm));
    }

    #[test]
    fn add_expired_fails() {
        let (sm, recorder) = manager();
        let s = Session::new("test", recorder);
        s.expire();
        assert!(matches!(sm.add(s), Err(Error::AlreadyExpired(id)) if id == "test"));
        assert!(!sm.contains("test"));
    }

    #[tokio::test]
    async fn add_rejects_id_collision() {
        let (sm, recorder) = manager();
        let old = sm.add(Session::new("dup", recorder.clone())).unwrap();
        sm.acquire("dup").await.unwrap();

        let new = Session::new("dup", recorder.clone());
        assert!(matches!(sm.add(new.clone()), Err(Error::AlreadyExists(id)) if id == "dup"));
        assert!(new.manager().is_none());
        assert!(Arc::ptr_eq(&sm.get("dup").unwrap(), &old));

        // The same session again is accepted without replacing anything.
        assert!(Arc::ptr_eq(&sm.add(old.clone()).unwrap(), &old));
        assert!(sm.is_acquired("dup"));

        sm.clear().await;
        assert_eq!(old.state(), SessionState::Closed);
        assert!(!old.is_acquired());
        assert_eq!(new.state(), SessionState::New);
        let closed = recorder
            .messages()
            .into_iter()
            .filter(|m| *m == SessionMessage::Closed)
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let (sm, recorder) = manager();
        assert!(matches!(sm.get("test"), Err(Error::NotFound(_))));

        let s = sm.add(Session::new("test", recorder)).unwrap();
        assert!(Arc::ptr_eq(&sm.get("test").unwrap(), &s));
    }

    #[test]
    fn find_with_default() {
        let (sm, recorder) = manager();
        let fallback = Session::new("fallback", recorder);
        let got = sm.find("id").unwrap_or_else(|| fallback.clone());
        assert!(Arc::ptr_eq(&got, &fallback));
        assert!(!sm.contains("id"));
    }

    #[test]
    fn get_or_create_uses_default_handler_and_timeout() {
        let (sm, _) = manager();
        let s = sm.get_or_create("test");
        assert!(sm.contains("test"));
        assert_eq!(s.timeout(), Duration::from_secs(5));
        assert!(s.manager().is_some());

        let again = sm.get_or_create("test");
        assert!(Arc::ptr_eq(&s, &again));
        assert_eq!(sm.len(), 1);
    }

    #[tokio::test]
    async fn acquire_marks_session() {
        let (sm, recorder) = manager();
        let s = sm.add(Session::new("test", recorder.clone())).unwrap();

        let got = sm.acquire("test").await.unwrap();

        assert!(Arc::ptr_eq(&got, &s));
        assert!(sm.is_acquired("test"));
        assert!(s.is_acquired());
        assert_eq!(s.state(), SessionState::Open);
        assert_eq!(recorder.messages(), vec![SessionMessage::Open]);
    }

    #[tokio::test]
    async fn acquire_unknown_fails() {
        let (sm, _) = manager();
        assert!(matches!(
            sm.acquire("test").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn acquire_twice_is_locked() {
        let (sm, recorder) = manager();
        sm.add(Session::new("test", recorder)).unwrap();
        sm.acquire("test").await.unwrap();

        assert!(matches!(
            sm.acquire("test").await,
            Err(Error::AlreadyAcquired(_))
        ));
    }

    #[tokio::test]
    async fn release_frees_slot() {
        let (sm, _) = manager();
        let s = sm.get_or_create("test");

        sm.acquire("test").await.unwrap();
        sm.release(&s);

        assert!(!sm.is_acquired("test"));
        assert!(!s.is_acquired());
        assert_eq!(s.state(), SessionState::Open);

        sm.acquire("test").await.unwrap();
        assert_eq!(s.hits(), 2);
    }

    #[tokio::test]
    async fn heartbeat_flag_follows_config() {
        let recorder = Recorder::new();
        let config = SessionsConfig {
            heartbeat: false,
            ..SessionsConfig::default()
        };
        let sm = SessionManager::new(config, recorder);
        let s = sm.get_or_create("test");

        sm.acquire_with("test", true).await.unwrap();
        assert!(!s.heartbeat_transport());
    }

    #[test]
    fn active_sessions_skip_expired() {
        let (sm, _) = manager();
        let s1 = sm.get_or_create("test1");
        let s2 = sm.get_or_create("test2");
        s2.expire();

        let active: Vec<_> = sm.active_sessions().collect();
        assert_eq!(active.len(), 1);
        assert!(Arc::ptr_eq(&active[0], &s1));

        // Restartable: a second pass sees the same thing.
        assert_eq!(sm.active_sessions().count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_open_sessions_only() {
        let (sm, _) = manager();
        let s1 = sm.get_or_create("test1");
        let s2 = sm.get_or_create("test2");
        let fresh = sm.get_or_create("fresh");
        let closing = sm.get_or_create("closing");
        let closed = sm.get_or_create("closed");
        for id in ["test1", "test2", "closing", "closed"] {
            sm.acquire(id).await.unwrap();
        }
        closing.close();
        for s in [&s1, &s2, &closing, &closed] {
            s.wait_raw().await.unwrap();
        }
        closing.wait_raw().await.unwrap();
        closed.remote_closed().await;
        // Marked expired but still pooled and open.
        s2.expire();

        assert_eq!(sm.broadcast("msg"), 2);

        let blob = Frame::MessageBlob(r#"a["msg"]"#.into());
        assert_eq!(s1.pending(), vec![blob.clone()]);
        assert_eq!(s2.pending(), vec![blob]);
        assert!(fresh.pending().is_empty());
        assert!(closing.pending().is_empty());
        assert_eq!(closed.state(), SessionState::Closed);
        assert!(closed.pending().is_empty());
    }

    #[tokio::test]
    async fn clear_closes_everything() {
        let (sm, recorder) = manager();
        let s1 = sm.get_or_create("s1");
        let s2 = sm.get_or_create("s2");
        sm.acquire("s1").await.unwrap();
        sm.acquire("s2").await.unwrap();

        sm.clear().await;

        assert!(sm.is_empty());
        assert!(!sm.is_acquired("s1"));
        for s in [&s1, &s2] {
            assert!(s.expired());
            assert_eq!(s.state(), SessionState::Closed);
        }
        let closed = recorder
            .messages()
            .into_iter()
            .filter(|m| *m == SessionMessage::Closed)
            .count();
        assert_eq!(closed, 2);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (sm, _) = manager();
        assert!(!sm.is_running());
        sm.start();
        sm.start();
        assert!(sm.is_running());

        sm.stop().await;
        sm.stop().await;
        assert!(!sm.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_intervals_keep_background_task_alive() {
        let recorder = Recorder::new();
        let config = SessionsConfig {
            gc_interval_secs: u64::MAX,
            heartbeat_interval_secs: u64::MAX,
            ..SessionsConfig::default()
        };
        let sm = SessionManager::new(config, recorder);

        sm.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sm.is_running());

        sm.stop().await;
        assert!(!sm.is_running());
    }

    #[test]
    fn weak_handle_does_not_keep_manager_alive() {
        let (sm, _) = manager();
        let weak = sm.weak();
        assert!(weak.upgrade().unwrap().same_as(&sm));
        drop(sm);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn debug_shows_counts() {
        let (sm, _) = manager();
        sm.get_or_create("a");
        assert_eq!(
            format!("{sm:?}"),
            "SessionManager { sessions: 1, acquired: 0 }"
        );
    }
}
