use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    model::{Message, UserId},
    store::{MessageStore, PersistenceError},
};

use super::{
    registry::Registry,
    session::DeliveryError,
    wire::{SendFrame, ServerFrame},
};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyText,

    #[error("unknown recipient {0}")]
    UnknownRecipient(UserId),

    #[error("message not sent: {0}")]
    Persistence(#[from] PersistenceError),
}

type Lane = Arc<tokio::sync::Mutex<()>>;

/// Persists direct messages and forwards them to the recipient's live session.
pub struct Relay {
    store: Arc<dyn MessageStore>,
    registry: Arc<Registry>,
    lanes: parking_lot::Mutex<HashMap<UserId, Lane>>,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            lanes: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Stores the message, then forwards it. Storage failure fails the call;
    /// forward failure only costs the live push, the message stays fetchable
    /// from history.
    ///
    /// Sends from one sender are serialized: id assignment, the insert and the
    /// forward enqueue all happen inside the sender's lane, so a recipient
    /// sees a sender's messages in the order they were created.
    pub async fn send(
        &self,
        sender: UserId,
        SendFrame { recipient, text, client_id }: SendFrame,
    ) -> Result<Message, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyText);
        }

        let lane = self.lane(sender);
        let _turn = lane.lane.lock().await;
        self.send_in_lane(sender, recipient, text, client_id).await
    }

    async fn send_in_lane(
        &self,
        sender: UserId,
        recipient: UserId,
        text: String,
        client_id: Option<String>,
    ) -> Result<Message, SendError> {
        if let Some(client_id) = client_id.as_deref() {
            if let Some(existing) = self.store.find_by_client_id(sender, client_id).await? {
                debug!(%sender, client_id, msg_id = %existing.id, "duplicate send, returning stored copy");
                return Ok(existing);
            }
        }

        if self.store.find_user(recipient).await?.is_none() {
            return Err(SendError::UnknownRecipient(recipient));
        }

        let msg = Message::new(sender, recipient, text, client_id);
        self.store.insert_message(&msg).await?;
        info!(msg_id = %msg.id, %sender, %recipient, "message stored");

        if let Err(err) = self.forward(recipient, &msg) {
            debug!(msg_id = %msg.id, %err, "live delivery skipped, message left in history");
        }
        if sender != recipient {
            if let Err(err) = self.forward(sender, &msg) {
                debug!(msg_id = %msg.id, %err, "sender echo skipped");
            }
        }

        Ok(msg)
    }

    fn forward(&self, to: UserId, msg: &Message) -> Result<(), DeliveryError> {
        let session = self.registry.lookup(to).ok_or(DeliveryError::Offline(to))?;
        session.push(ServerFrame::Message(msg.clone())).inspect_err(|err| {
            warn!(msg_id = %msg.id, user_id = %to, %err, "forward failed");
        })
    }

    /// Conversation between `a` and `b`, oldest first.
    pub async fn history(&self, a: UserId, b: UserId) -> Result<Vec<Message>, PersistenceError> {
        self.store.conversation(a, b).await
    }

    fn lane(&self, sender: UserId) -> LaneHold<'_> {
        let lane = self.lanes.lock().entry(sender).or_default().clone();
        LaneHold { lanes: &self.lanes, sender, lane }
    }
}

/// A sender's claim on its lane. Dropping the last claim removes the lane,
/// including when the send future is dropped part way.
struct LaneHold<'a> {
    lanes: &'a parking_lot::Mutex<HashMap<UserId, Lane>>,
    sender: UserId,
    lane: Lane,
}

impl Drop for LaneHold<'_> {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock();
        // the map and this hold
        if lanes.get(&self.sender).is_some_and(|lane| Arc::strong_count(lane) == 2) {
            lanes.remove(&self.sender);
        }
    }
}
