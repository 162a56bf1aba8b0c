use std::collections::BTreeMap;

use crate::{chat::wire::OnlineUser, model::UserId};

/// Who is online, as last pushed by the server, minus ourselves.
#[derive(Debug, Clone)]
pub struct Roster {
    me: UserId,
    online: BTreeMap<UserId, String>,
}

impl Roster {
    pub fn new(me: UserId) -> Self {
        Self { me, online: BTreeMap::new() }
    }

    /// Replaces the whole set; pushes are full snapshots, not deltas.
    pub fn apply(&mut self, online: Vec<OnlineUser>) {
        self.online = online
            .into_iter()
            .filter(|u| u.user_id != self.me)
            .map(|u| (u.user_id, u.username))
            .collect();
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains_key(&user_id)
    }

    pub fn username(&self, user_id: UserId) -> Option<&str> {
        self.online.get(&user_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, &str)> {
        self.online.iter().map(|(id, name)| (*id, name.as_str()))
    }
}
