//! Async repository traits consumed by the server, and their SQLite backing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_shared::models::{Chat, ChatMessage, User};
use parley_shared::types::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Lookup of user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>>;
}

/// Chats and their messages.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// The chat with its members, or `None` if it does not exist.
    async fn find_chat_by_id(&self, id: ChatId) -> Result<Option<Chat>>;

    /// Persist a message whose text is already ciphertext.
    async fn insert_message(
        &self,
        chat: &Chat,
        sender: &User,
        ciphertext: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ChatMessage>;

    /// The `limit` most recent messages of a chat, oldest first.
    async fn find_chat_messages(&self, chat_id: ChatId, limit: u32) -> Result<Vec<ChatMessage>>;
}

/// Both repositories over one SQLite connection.
///
/// Queries run on tokio's blocking pool so they never stall a connection
/// task.
#[derive(Clone)]
pub struct SqliteRepository {
    db: Arc<Mutex<Database>>,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl UserRepository for SqliteRepository {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.with_db(move |db| db.find_user(id)).await
    }
}

#[async_trait]
impl ChatRepository for SqliteRepository {
    async fn find_chat_by_id(&self, id: ChatId) -> Result<Option<Chat>> {
        self.with_db(move |db| db.find_chat(id)).await
    }

    async fn insert_message(
        &self,
        chat: &Chat,
        sender: &User,
        ciphertext: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: sender.id,
            message_text: ciphertext.to_string(),
            created_at: timestamp,
            updated_at: timestamp,
        };

        let row = message.clone();
        self.with_db(move |db| db.insert_message(&row)).await?;

        tracing::debug!(
            message_id = %message.id,
            chat_id = %message.chat_id,
            sender = %message.sender_id.short(),
            "message persisted"
        );
        Ok(message)
    }

    async fn find_chat_messages(&self, chat_id: ChatId, limit: u32) -> Result<Vec<ChatMessage>> {
        self.with_db(move |db| db.get_messages_for_chat(chat_id, limit))
            .await
    }
}
