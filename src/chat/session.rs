use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::{User, UserId};

use super::wire::ServerFrame;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("user {0} has no live session")]
    Offline(UserId),

    #[error("session {0} is closed")]
    Closed(Uuid),
}

#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Close,
}

/// One live socket binding for a user. Cheap to clone; clones share the same outbound queue.
#[derive(Debug, Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: Uuid,
    user: User,
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl ChatSession {
    pub fn new(user: User) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(Inner {
                id: Uuid::now_v7(),
                user,
                tx,
                closed: AtomicBool::new(false),
            }),
        };
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn user(&self) -> &User {
        &self.inner.user
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queues a frame behind everything already queued for this session.
    pub fn push(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed(self.id()));
        }
        self.inner
            .tx
            .send(Outbound::Frame(frame))
            .map_err(|_| DeliveryError::Closed(self.id()))
    }

    /// Marks the session closed and tells its writer to hang up. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.inner.tx.send(Outbound::Close);
        true
    }

    pub fn same(&self, other: &ChatSession) -> bool {
        self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User { id: UserId::new(), username: name.to_owned() }
    }

    #[test]
    fn close_is_reported_once_and_blocks_pushes() {
        let (session, mut rx) = ChatSession::new(user("ana"));
        session.push(ServerFrame::Online { online: vec![] }).unwrap();

        assert!(session.close());
        assert!(!session.close());
        assert!(matches!(
            session.push(ServerFrame::Online { online: vec![] }),
            Err(DeliveryError::Closed(_))
        ));

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_fails_once_writer_is_gone() {
        let (session, rx) = ChatSession::new(user("ana"));
        drop(rx);
        assert!(session.push(ServerFrame::Online { online: vec![] }).is_err());
    }
}
