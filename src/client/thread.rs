use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    chat::wire::SendFrame,
    model::{Message, UserId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Shown locally before the server confirmed it. Not durable.
    Tentative { client_id: String, text: String },
    Confirmed(Message),
}

impl Entry {
    pub fn text(&self) -> &str {
        match self {
            Entry::Tentative { text, .. } => text,
            Entry::Confirmed(msg) => &msg.text,
        }
    }
}

/// One conversation as the client shows it.
///
/// Confirmed entries are unique by message id. A confirmed copy carrying the
/// `client_id` of a tentative entry takes that entry's place.
#[derive(Debug, Clone)]
pub struct Thread {
    me: UserId,
    peer: UserId,
    entries: Vec<Entry>,
    seen: HashSet<Uuid>,
}

impl Thread {
    pub fn new(me: UserId, peer: UserId) -> Self {
        Self { me, peer, entries: Vec::new(), seen: HashSet::new() }
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Adds a tentative entry and returns the frame to put on the wire.
    pub fn compose(&mut self, text: impl Into<String>) -> SendFrame {
        let text = text.into();
        let client_id = Uuid::now_v7().to_string();
        self.entries.push(Entry::Tentative { client_id: client_id.clone(), text: text.clone() });
        SendFrame { recipient: self.peer, text, client_id: Some(client_id) }
    }

    /// Folds in a server-confirmed message. Returns false if it was not for
    /// this thread or was already present.
    pub fn confirm(&mut self, msg: Message) -> bool {
        if !msg.is_between(self.me, self.peer) || !self.seen.insert(msg.id) {
            return false;
        }

        let tentative = match (&msg.client_id, msg.sender == self.me) {
            (Some(id), true) => self.entries.iter().position(
                |e| matches!(e, Entry::Tentative { client_id, .. } if client_id == id),
            ),
            _ => None,
        };
        match tentative {
            Some(i) => self.entries[i] = Entry::Confirmed(msg),
            None => self.entries.push(Entry::Confirmed(msg)),
        }
        true
    }

    /// Merges a history fetch. Fetched messages come first, in the order the
    /// server returned them. Live confirmations the fetch did not include
    /// follow, then entries still waiting for confirmation.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let mut fetched = HashSet::new();
        let history: Vec<Message> = history
            .into_iter()
            .filter(|msg| msg.is_between(self.me, self.peer) && fetched.insert(msg.id))
            .collect();
        let settled: HashSet<&str> = history
            .iter()
            .filter(|msg| msg.sender == self.me)
            .filter_map(|msg| msg.client_id.as_deref())
            .collect();

        let (live, pending): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|e| match e {
                Entry::Confirmed(msg) => !fetched.contains(&msg.id),
                Entry::Tentative { client_id, .. } => !settled.contains(client_id.as_str()),
            })
            .partition(|e| matches!(e, Entry::Confirmed(_)));

        self.seen.extend(fetched);
        self.entries = history.iter().cloned().map(Entry::Confirmed).chain(live).chain(pending).collect();
    }

    /// Drops a tentative entry the server refused.
    pub fn reject(&mut self, client_id: &str) -> Option<Entry> {
        let i = self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Tentative { client_id: id, .. } if id == client_id))?;
        Some(self.entries.remove(i))
    }
}
