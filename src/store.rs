use async_trait::async_trait;

use crate::model::{Message, User, UserId};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable backing store for messages plus read access to the user directory.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn insert_message(&self, msg: &Message) -> Result<(), PersistenceError>;

    /// Finds an earlier send by the same sender carrying the same idempotency key.
    async fn find_by_client_id(
        &self,
        sender: UserId,
        client_id: &str,
    ) -> Result<Option<Message>, PersistenceError>;

    /// All messages between `a` and `b`, in creation order.
    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>, PersistenceError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, PersistenceError>;

    /// Every known user, ordered by username.
    async fn users(&self) -> Result<Vec<User>, PersistenceError>;
}
