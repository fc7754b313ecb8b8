//! Periodic garbage collection and heartbeat pass over the registry.
//!
//! A session is due once it is marked expired or its deadline has passed.
//! Unattached due sessions are evicted immediately.  Attached ones are left
//! to their transport until the deadline is exceeded by the configured
//! grace margin, after which they are detached and evicted as well.
//!
//! Selection happens under the registry lock, so an `acquire` that takes
//! the lock first keeps its session for this pass, and one that comes after
//! an eviction sees `NotFound`.  Closing the victims runs after the lock is
//! released.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tether_domain::trace::{EvictReason, TraceEvent};

use crate::manager::SessionManager;
use crate::session::{Session, SessionState};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions in the pool when the pass started.
    pub scanned: usize,
    /// Sessions found due (expired flag or deadline passed).
    pub expired: usize,
    /// Sessions removed from the pool.
    pub evicted: usize,
    /// Sessions left in the pool.
    pub remaining: usize,
}

impl SessionManager {
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One pass with an explicit clock reading.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let grace =
            chrono::Duration::from_std(Duration::from_secs(self.config().acquired_grace_secs))
                .unwrap_or(chrono::Duration::MAX);

        let mut report = SweepReport::default();
        let mut victims: Vec<(Arc<Session>, EvictReason)> = Vec::new();
        {
            let mut registry = self.shared.registry.lock();
            let registry = &mut *registry;
            report.scanned = registry.pool.len();

            registry.pool.retain(|id, session| {
                if !(session.expired() || session.expires() < now) {
                    return true;
                }
                report.expired += 1;

                if !registry.acquired.contains_key(id) {
                    victims.push((session.clone(), EvictReason::Expired));
                    return false;
                }
                let overdue = session
                    .expires()
                    .checked_add_signed(grace)
                    .is_some_and(|limit| limit < now);
                if overdue {
                    registry.acquired.remove(id);
                    victims.push((session.clone(), EvictReason::AcquiredPastGrace));
                    return false;
                }
                true
            });
            report.remaining = registry.pool.len();
        }
        report.evicted = victims.len();

        for (session, reason) in victims {
            if reason == EvictReason::AcquiredPastGrace {
                tracing::warn!(
                    session_id = %session.id(),
                    "evicting attached session past its grace margin"
                );
                session.release();
            }
            // Queue a close frame for whoever drains next, then go terminal.
            if session.state() == SessionState::Open {
                session.close();
            }
            session.remote_closed().await;
            TraceEvent::SessionEvicted {
                session_id: session.id().to_owned(),
                reason,
            }
            .emit();
        }

        if report.evicted > 0 {
            tracing::debug!(
                scanned = report.scanned,
                evicted = report.evicted,
                remaining = report.remaining,
                "session sweep"
            );
        }
        TraceEvent::SweepCompleted {
            scanned: report.scanned,
            expired: report.expired,
            evicted: report.evicted,
            remaining: report.remaining,
        }
        .emit();
        report
    }

    /// Heartbeat every attached session.  Returns how many were touched.
    pub fn heartbeat_acquired(&self) -> usize {
        let held: Vec<Arc<Session>> = self
            .shared
            .registry
            .lock()
            .acquired
            .values()
            .cloned()
            .collect();
        for session in &held {
            session.heartbeat();
        }
        held.len()
    }
}
