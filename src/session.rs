//! Session registry: per-address concurrent session tracking and the
//! process-wide ban list.
//!
//! Both pieces of state are process-wide and mutated from every connection
//! task, so per design note §9 they are wrapped in a single owner value
//! behind one mutex rather than scattered as independent globals.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// A single open session: identity, owning address, and creation time.
/// Equality and hashing are by id alone: two sessions are equal iff
/// their identifiers are equal.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub address: String,
    pub created_at: SystemTime,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Session {}

impl std::hash::Hash for Session {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Session {
    fn new(address: String) -> Self {
        Session {
            id: Uuid::new_v4(),
            address,
            created_at: SystemTime::now(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    by_address: HashMap<String, Vec<Session>>,
    banned: HashSet<String>,
}

/// Owns the session map and ban list behind one mutex; the only
/// process-wide mutable state this server keeps.
pub struct SessionRegistry {
    session_limit: usize,
    state: Mutex<SessionState>,
}

impl SessionRegistry {
    /// `session_limit == 0` means unbounded concurrent sessions per address.
    pub fn new(session_limit: usize) -> Self {
        SessionRegistry {
            session_limit,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Appends a new session for `address`. If the per-address limit is
    /// exceeded by the append, the just-appended session is rolled back and
    /// `None` is returned — the caller is expected to reply
    /// `ERR_SESSION_LIMIT_REACHED` and close the connection.
    pub async fn open(&self, address: &str) -> Option<Session> {
        let mut state = self.state.lock().await;
        let session = Session::new(address.to_string());
        let list = state.by_address.entry(address.to_string()).or_default();
        list.push(session.clone());

        if self.session_limit > 0 && list.len() > self.session_limit {
            list.pop();
            warn!(address, limit = self.session_limit, "session limit reached");
            return None;
        }
        debug!(address, session_id = %session.id, "session opened");
        Some(session)
    }

    /// Removes `session` from its address's list. A no-op if the session is
    /// already absent — closing a session twice has no effect the second
    /// time.
    pub async fn close(&self, session: &Session) {
        let mut state = self.state.lock().await;
        if let Some(list) = state.by_address.get_mut(&session.address) {
            let before = list.len();
            list.retain(|s| s.id != session.id);
            if list.len() != before {
                debug!(session_id = %session.id, "session closed");
            }
            if list.is_empty() {
                state.by_address.remove(&session.address);
            }
        }
    }

    /// All sessions currently open for `address`.
    pub async fn sessions_of(&self, address: &str) -> Vec<Session> {
        let state = self.state.lock().await;
        state.by_address.get(address).cloned().unwrap_or_default()
    }

    pub async fn ban(&self, address: &str) {
        let mut state = self.state.lock().await;
        state.banned.insert(address.to_string());
        warn!(address, "address banned");
    }

    pub async fn unban(&self, address: &str) {
        let mut state = self.state.lock().await;
        state.banned.remove(address);
    }

    pub async fn is_banned(&self, address: &str) -> bool {
        let state = self.state.lock().await;
        state.banned.contains(address)
    }
}
