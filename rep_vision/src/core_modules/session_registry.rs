// THEORY:
// The `SessionRegistry` owns every user's `SessionState`. It is the only
// shared, mutable structure in the engine, and it is built so that users never
// wait on each other:
//
// 1.  **Two-Level Locking**: the map itself sits behind a `RwLock` that is held
//     only long enough to find or insert a handle. Each session then has its own
//     `Mutex`, which serializes every read-modify-write of that one user's state
//     (two frames, or a frame and a stop call).
// 2.  **Lazy Birth**: sessions appear on first reference and are born inactive.
//     `stop` is the exception: it never creates a session.
// 3.  **Idle Death**: inactive sessions nobody has touched for a while can be
//     evicted. Active sessions are never evicted.

use crate::core_modules::clock::{Clock, SystemClock};
use crate::core_modules::rep_counter::SessionState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Shared handle to one user's state.
pub type SessionHandle = Arc<Mutex<SessionState>>;

/// What a finished session hands to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub repetition_count: u32,
    pub elapsed: Duration,
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(SessionSummary),
    /// The user had no session, or it was not running.
    NoActiveSession,
}

pub struct SessionRegistry<C: Clock = SystemClock> {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    clock: C,
}

impl SessionRegistry<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::default())
    }
}

impl Default for SessionRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SessionRegistry<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Returns the user's session, creating an inactive one if needed.
    pub fn get_or_create(&self, user_id: &str) -> SessionHandle {
        if let Some(handle) = self.find(user_id) {
            return handle;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id, "creating session");
                Arc::new(Mutex::new(SessionState::new(now)))
            })
            .clone()
    }

    pub fn find(&self, user_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Starts (or restarts) counting for the user.
    pub fn start(&self, user_id: &str) {
        let handle = self.get_or_create(user_id);
        let mut state = lock(&handle);
        state.start(self.clock.now());
        tracing::info!(user_id, "session started");
    }

    /// Stops counting for the user and reports the final tally.
    pub fn stop(&self, user_id: &str) -> StopOutcome {
        match self.stop_with(user_id, |_| Ok::<(), Infallible>(())) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Like `stop`, but the session is only stopped once `commit` accepts the
    /// summary. The session lock is held throughout, so no frame can count in
    /// between; if `commit` fails the session keeps running untouched.
    pub fn stop_with<E>(
        &self,
        user_id: &str,
        commit: impl FnOnce(&SessionSummary) -> Result<(), E>,
    ) -> Result<StopOutcome, E> {
        let Some(handle) = self.find(user_id) else {
            return Ok(StopOutcome::NoActiveSession);
        };
        let mut state = lock(&handle);
        if !state.is_active {
            return Ok(StopOutcome::NoActiveSession);
        }

        let now = self.clock.now();
        let summary = SessionSummary {
            user_id: user_id.to_string(),
            repetition_count: state.repetition_count,
            elapsed: state.elapsed(now),
        };
        commit(&summary)?;

        state.stop(now);
        tracing::info!(
            user_id,
            reps = summary.repetition_count,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "session stopped"
        );
        Ok(StopOutcome::Stopped(summary))
    }

    /// A copy of the user's current state, if the user is known.
    pub fn snapshot(&self, user_id: &str) -> Option<SessionState> {
        self.find(user_id).map(|handle| lock(&handle).clone())
    }

    /// Drops inactive sessions untouched for longer than `max_idle` that no
    /// caller currently holds. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|user_id, handle| {
            // Someone else holding the handle (or its lock) means it is in use.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let Ok(state) = handle.try_lock() else {
                return true;
            };
            let keep = state.is_active || now.saturating_sub(state.last_touched) <= max_idle;
            if !keep {
                tracing::debug!(user_id = user_id.as_str(), "evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locks a session. A panic inside another frame's critical section leaves
/// the state consistent field by field, so poisoning is ignored.
pub fn lock(handle: &SessionHandle) -> MutexGuard<'_, SessionState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
