use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::model::UserId;

use super::{presence, session::ChatSession, wire::OnlineUser};

/// userId → live session, at most one per user.
///
/// Every mutation and the presence broadcast that follows it run under the
/// same lock, so concurrent connects and disconnects can't lose updates and
/// every session sees presence snapshots in mutation order. Nothing awaits
/// while the lock is held; pushes only enqueue.
#[derive(Default)]
pub struct Registry {
    sessions: Mutex<BTreeMap<UserId, ChatSession>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `session` to its user, closing whatever session the user had before.
    /// Returns the superseded session, if any.
    pub fn register(&self, session: ChatSession) -> Option<ChatSession> {
        let mut sessions = self.sessions.lock();
        let user_id = session.user_id();

        let previous = sessions.remove(&user_id);
        if let Some(previous) = &previous {
            previous.close();
            debug!(%user_id, old = %previous.id(), new = %session.id(), "session superseded");
        }

        info!(%user_id, session_id = %session.id(), "session registered");
        sessions.insert(user_id, session);
        presence::broadcast(&sessions);
        previous
    }

    /// Removes the mapping only if `session` is still the current one for its user.
    /// A stale session (already superseded) leaves the registry untouched.
    pub fn unregister(&self, session: &ChatSession) -> bool {
        let mut sessions = self.sessions.lock();
        let user_id = session.user_id();

        match sessions.get(&user_id) {
            Some(current) if current.same(session) => {}
            _ => {
                debug!(%user_id, session_id = %session.id(), "stale unregister ignored");
                return false;
            }
        }

        if let Some(removed) = sessions.remove(&user_id) {
            removed.close();
        }
        info!(%user_id, session_id = %session.id(), "session unregistered");
        presence::broadcast(&sessions);
        true
    }

    /// Drops whatever session `user_id` holds, e.g. on logout.
    pub fn evict(&self, user_id: UserId) -> Option<ChatSession> {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(&user_id)?;
        removed.close();
        info!(%user_id, session_id = %removed.id(), "session evicted");
        presence::broadcast(&sessions);
        Some(removed)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ChatSession> {
        self.sessions.lock().get(&user_id).cloned()
    }

    pub fn presence(&self) -> Vec<OnlineUser> {
        presence::derive(&self.sessions.lock())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
