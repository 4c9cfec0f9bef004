//! Domain models for direct chats.
//!
//! Field names serialize in camelCase because these structs are pushed to
//! clients as-is inside `message-received` / `chat-loaded` events.
//!
//! `message_text` holds ciphertext whenever a model comes out of the store
//! and plaintext only after it went through the [`Decryptor`](crate::Decryptor).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A direct chat with its members but without its messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Exactly two users for a direct chat.
    pub users: Vec<User>,
}

impl Chat {
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.users.iter().any(|u| u.id == *user_id)
    }

    pub fn member(&self, user_id: &UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == *user_id)
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|u| u.id).collect()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message row as persisted: references only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub message_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message enriched with its sender and its chat (including members).
///
/// This is the shape delivered in `message-received`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectChatMessage {
    pub id: MessageId,
    pub message_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sender: User,
    pub chat: Chat,
}

impl DirectChatMessage {
    pub fn from_parts(message: ChatMessage, sender: User, chat: Chat) -> Self {
        Self {
            id: message.id,
            message_text: message.message_text,
            created_at: message.created_at,
            updated_at: message.updated_at,
            sender,
            chat,
        }
    }

    /// Everyone who should see this message live.
    pub fn recipient_ids(&self) -> Vec<UserId> {
        self.chat.member_ids()
    }
}

/// A chat together with (a window of) its messages, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectChat {
    pub id: ChatId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub users: Vec<User>,
    pub messages: Vec<ChatMessage>,
}

impl DirectChat {
    pub fn from_parts(chat: Chat, messages: Vec<ChatMessage>) -> Self {
        Self {
            id: chat.id,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
            users: chat.users,
            messages,
        }
    }
}
