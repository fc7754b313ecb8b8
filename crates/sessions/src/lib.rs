//! Session engine for tether.
//!
//! A [`Session`] is a server-side mailbox that outlives any single
//! transport connection.  Transports attach through the [`SessionManager`]
//! (exclusive per session), drain outbound frames with [`Session::wait`],
//! and push inbound data through the `remote_*` methods.  The manager's
//! background task expires idle sessions and sends heartbeats.

pub mod handler;
pub mod manager;
pub mod session;
pub mod sweep;

pub use handler::{handler_fn, SessionHandler, SessionMessage};
pub use manager::{SessionManager, WeakSessionManager};
pub use session::{Session, SessionState, DEFAULT_TIMEOUT};
pub use sweep::SweepReport;
