use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    model::{Message, User, UserId},
    store::{MessageStore, PersistenceError},
};

// users:    unique: id, username
// messages: unique: id; unique: sender, client_id; seq gives creation order
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        text TEXT NOT NULL,
        client_id TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE (sender, client_id)
    )",
    "CREATE INDEX IF NOT EXISTS messages_pair ON messages (sender, recipient)",
];

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(db_pool).await?;
    }
    Ok(())
}

type MessageRow = (String, String, String, String, i64, Option<String>);

fn parse_uuid(s: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(s).map_err(|e| PersistenceError::Corrupt(format!("{s}: {e}")))
}

fn row_to_message((id, sender, recipient, text, created_at, client_id): MessageRow) -> Result<Message, PersistenceError> {
    Ok(Message {
        id: parse_uuid(&id)?,
        sender: UserId(parse_uuid(&sender)?),
        recipient: UserId(parse_uuid(&recipient)?),
        text,
        created_at,
        client_id,
    })
}

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Adds a directory entry. Accounts are owned by the external identity flow; this is its write path.
    pub async fn insert_user(&self, user: &User) -> Result<(), PersistenceError> {
        sqlx::query("INSERT INTO users (id,username) VALUES (?,?)")
            .bind(user.id.to_string())
            .bind(&user.username)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, msg: &Message) -> Result<(), PersistenceError> {
        sqlx::query("INSERT INTO messages (id,sender,recipient,text,client_id,created_at) VALUES (?,?,?,?,?,?)")
            .bind(msg.id.to_string())
            .bind(msg.sender.to_string())
            .bind(msg.recipient.to_string())
            .bind(&msg.text)
            .bind(msg.client_id.as_deref())
            .bind(msg.created_at)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn find_by_client_id(
        &self,
        sender: UserId,
        client_id: &str,
    ) -> Result<Option<Message>, PersistenceError> {
        let row: Option<MessageRow> =
            sqlx::query_as("SELECT id,sender,recipient,text,created_at,client_id FROM messages WHERE sender=? AND client_id=?")
                .bind(sender.to_string())
                .bind(client_id)
                .fetch_optional(&self.db_pool)
                .await?;
        row.map(row_to_message).transpose()
    }

    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>, PersistenceError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,sender,recipient,text,created_at,client_id FROM messages
             WHERE (sender=? AND recipient=?) OR (sender=? AND recipient=?)
             ORDER BY seq",
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .bind(b.to_string())
        .bind(a.to_string())
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, PersistenceError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT username FROM users WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(username,)| User { id, username }))
    }

    async fn users(&self) -> Result<Vec<User>, PersistenceError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id,username FROM users ORDER BY username")
            .fetch_all(&self.db_pool)
            .await?;
        rows.into_iter()
            .map(|(id, username)| Ok(User { id: UserId(parse_uuid(&id)?), username }))
            .collect()
    }
}
