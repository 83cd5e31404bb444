//! Session Store
//!
//! Per-chat form state: the current conversation state plus the fields
//! collected so far. Volatile by design of the deployment: sessions are
//! lost on restart and users start over from `/menu`.
//!
//! Each session sits behind its own async mutex so that one session's
//! transition (including awaited sheet calls) is serialized while other
//! sessions proceed untouched.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::forms::Mode;

/// Opaque session identifier (the Telegram chat id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    /// "By address" / "By account" menu shown
    ChoosingMode,
    /// Street picker shown
    ChoosingAddress,
    EnteringAccountNumber,
    /// Waiting for field `index` of the mode's form
    CollectingField { mode: Mode, index: usize },
    /// Summary shown with Submit / Restart
    ReviewingSummary { mode: Mode },
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChoosingMode => "choosing_mode",
            Self::ChoosingAddress => "choosing_address",
            Self::EnteringAccountNumber => "entering_account_number",
            Self::CollectingField { .. } => "collecting_field",
            Self::ReviewingSummary { .. } => "reviewing_summary",
        }
    }
}

/// One user's in-progress form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub state: State,
    pub fields: BTreeMap<String, String>,
}

impl Session {
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Drop collected fields and return to `Idle`
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.fields.clear();
    }
}

/// In-memory session store with per-session locking
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<AsyncMutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: SessionId) -> Arc<AsyncMutex<Session>> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(id).or_default())
    }

    /// Exclusive access to one session for the duration of a transition.
    /// Creates an `Idle` session if none exists.
    pub async fn lock(&self, id: SessionId) -> OwnedMutexGuard<Session> {
        self.slot(id).lock_owned().await
    }

    /// Snapshot of a session (an absent session reads as `Idle`)
    pub async fn get(&self, id: SessionId) -> Session {
        let session = self.lock(id).await.clone();
        self.release(id);
        session
    }

    /// Atomic read-modify-write of one session
    pub async fn update<F, T>(&self, id: SessionId, f: F) -> T
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut session = self.lock(id).await;
        let result = f(&mut session);
        drop(session);
        self.release(id);
        result
    }

    pub async fn reset(&self, id: SessionId) {
        self.lock(id).await.reset();
        self.release(id);
    }

    /// Drop the slot of an idle, empty session nobody else holds.
    /// A later event recreates it as `Idle`, which is indistinguishable.
    pub fn release(&self, id: SessionId) {
        let mut sessions = self.sessions.lock();
        let unused = match sessions.get(&id) {
            Some(slot) => {
                Arc::strong_count(slot) == 1
                    && slot
                        .try_lock()
                        .map(|session| *session == Session::default())
                        .unwrap_or(false)
            }
            None => false,
        };
        if unused {
            sessions.remove(&id);
        }
    }

    /// Number of sessions currently held
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
