//! Online-set derivation. Presence is never stored on its own; it is always
//! recomputed from the registry map.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::UserId;

use super::{
    session::ChatSession,
    wire::{OnlineUser, ServerFrame},
};

/// Online users, ordered by user id.
pub fn derive(sessions: &BTreeMap<UserId, ChatSession>) -> Vec<OnlineUser> {
    sessions
        .iter()
        .map(|(user_id, session)| OnlineUser {
            user_id: *user_id,
            username: session.user().username.clone(),
        })
        .collect()
}

/// Pushes the current online set to every live session. A failing session is
/// skipped; the rest still get the update. Returns how many were reached.
pub fn broadcast(sessions: &BTreeMap<UserId, ChatSession>) -> usize {
    let online = derive(sessions);
    let mut reached = 0;
    for session in sessions.values() {
        match session.push(ServerFrame::Online { online: online.clone() }) {
            Ok(()) => reached += 1,
            Err(err) => debug!(user_id = %session.user_id(), %err, "presence push skipped"),
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chat::session::Outbound, model::User};

    #[test]
    fn broadcast_isolates_dead_sessions() {
        let mut sessions = BTreeMap::new();
        let mut receivers = Vec::new();
        for name in ["ana", "bo", "cy"] {
            let (session, rx) = ChatSession::new(User { id: UserId::new(), username: name.into() });
            sessions.insert(session.user_id(), session);
            receivers.push(rx);
        }
        // kill the middle receiver
        let dead = receivers.remove(1);
        drop(dead);

        assert_eq!(broadcast(&sessions), 2);
        for mut rx in receivers {
            let Ok(Outbound::Frame(ServerFrame::Online { online })) = rx.try_recv() else {
                panic!("expected presence frame");
            };
            assert_eq!(online, derive(&sessions));
            assert_eq!(online.len(), 3);
        }
    }
}
