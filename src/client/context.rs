//! Shared client session state.
//!
//! One `SessionContext` is created by the application entry point and handed to both
//! the interceptor and the session manager. Every mutation goes through here so the
//! persisted snapshot, the generation counter and the event stream stay in step.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::storage::{MemoryStorage, SessionStorage};
use crate::identity::User;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { user_id: String },
    TokenRefreshed,
    LoggedOut,
    /// The session could not be recovered; the front end should send the user to login.
    LoginRequired,
}

struct State {
    data: SessionData,
    generation: u64,
    phase: SessionPhase,
}

pub struct SessionContext {
    state: RwLock<State>,
    storage: Arc<dyn SessionStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    /// Restores whatever the storage holds; an unreadable store starts anonymous.
    pub fn new(storage: Arc<dyn SessionStorage>) -> Arc<Self> {
        let data = match storage.load() {
            Ok(d) => d.unwrap_or_default(),
            Err(e) => {
                warn!(target: "client", "session storage unavailable, starting anonymous: {}", e);
                SessionData::default()
            }
        };
        let phase = if data.is_authenticated { SessionPhase::Authenticated } else { SessionPhase::Anonymous };
        let (events, _) = broadcast::channel(32);
        Arc::new(Self { state: RwLock::new(State { data, generation: 0, phase }), storage, events })
    }

    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionData {
        self.state.read().data.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.read().data.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.read().data.refresh_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().data.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().data.is_authenticated
    }

    /// Bumped whenever the session is replaced or cleared. A request compares the
    /// value it started with before retrying.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.state.write().phase = phase;
    }

    /// Install a freshly issued session (login or register).
    pub fn establish(&self, user: User, access_token: String, refresh_token: Option<String>) {
        let user_id = user.id.clone();
        let snapshot = {
            let mut st = self.state.write();
            st.generation += 1;
            st.phase = SessionPhase::Authenticated;
            st.data = SessionData {
                user: Some(user),
                access_token: Some(access_token),
                refresh_token,
                is_authenticated: true,
            };
            st.data.clone()
        };
        self.persist(&snapshot);
        let _ = self.events.send(SessionEvent::Authenticated { user_id });
    }

    /// Swap in a refreshed access token, unless the session changed since `generation`.
    pub fn replace_access_token(&self, generation: u64, access_token: String) -> bool {
        let snapshot = {
            let mut st = self.state.write();
            if st.generation != generation {
                return false;
            }
            st.data.access_token = Some(access_token);
            st.phase = SessionPhase::Authenticated;
            st.data.clone()
        };
        self.persist(&snapshot);
        let _ = self.events.send(SessionEvent::TokenRefreshed);
        true
    }

    /// Cache a server-confirmed user and mark the session authenticated.
    pub fn set_user(&self, user: User) {
        let snapshot = {
            let mut st = self.state.write();
            st.data.user = Some(user);
            st.data.is_authenticated = true;
            st.phase = SessionPhase::Authenticated;
            st.data.clone()
        };
        self.persist(&snapshot);
    }

    /// Re-read the persisted snapshot, which another process may have written.
    /// Adopts it only when it differs from what is held in memory.
    pub fn reload(&self) -> bool {
        let stored = match self.storage.load() {
            Ok(Some(d)) => d,
            Ok(None) => return false,
            Err(e) => {
                warn!(target: "client", "failed to reload stored session: {}", e);
                return false;
            }
        };
        let mut st = self.state.write();
        if st.data == stored {
            return false;
        }
        st.generation += 1;
        st.phase = if stored.is_authenticated { SessionPhase::Authenticated } else { SessionPhase::Anonymous };
        st.data = stored;
        true
    }

    /// Drop all credentials. Returns false (and emits nothing) when none were held.
    pub fn clear(&self, reason: SessionEvent) -> bool {
        let held = {
            let mut st = self.state.write();
            Self::reset(&mut st)
        };
        self.finish_clear(held, reason)
    }

    /// Like `clear`, but only while the session is still the one identified by
    /// `generation`. A stale request must not end a session established after it.
    pub fn clear_if(&self, generation: u64, reason: SessionEvent) -> bool {
        let held = {
            let mut st = self.state.write();
            if st.generation != generation {
                debug!(target: "client", "ignoring stale clear ({:?}) for generation {}", reason, generation);
                return false;
            }
            Self::reset(&mut st)
        };
        self.finish_clear(held, reason)
    }

    /// Enter `Refreshing` if the session is still `generation`.
    pub fn begin_refresh(&self, generation: u64) -> bool {
        let mut st = self.state.write();
        if st.generation != generation {
            return false;
        }
        st.phase = SessionPhase::Refreshing;
        true
    }

    fn reset(st: &mut State) -> bool {
        let held = st.data != SessionData::default();
        if held {
            st.generation += 1;
            st.data = SessionData::default();
        }
        st.phase = SessionPhase::Anonymous;
        held
    }

    fn finish_clear(&self, held: bool, reason: SessionEvent) -> bool {
        if let Err(e) = self.storage.clear() {
            warn!(target: "client", "failed to clear stored session: {}", e);
        }
        if held {
            debug!(target: "client", "session cleared ({:?})", reason);
            let _ = self.events.send(reason);
        }
        held
    }

    fn persist(&self, data: &SessionData) {
        if let Err(e) = self.storage.save(data) {
            warn!(target: "client", "failed to persist session: {}", e);
        }
    }
}
