use rusqlite::params;

use parley_shared::models::ChatMessage;
use parley_shared::types::{ChatId, MessageId, UserId};

use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a message and bump the chat's `updated_at`.
    ///
    /// `message.message_text` must already be ciphertext.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO direct_chat_messages
                 (id, chat_id, sender_id, message_text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.message_text,
                encode_ts(&message.created_at),
                encode_ts(&message.updated_at),
            ],
        )?;
        if inserted != 1 {
            return Err(StoreError::NotFound);
        }
        tx.execute(
            "UPDATE direct_chats SET updated_at = ?2 WHERE id = ?1",
            params![message.chat_id.to_string(), encode_ts(&message.created_at)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The `limit` most recent messages of a chat, oldest first.
    pub fn get_messages_for_chat(&self, chat_id: ChatId, limit: u32) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, message_text, created_at, updated_at
             FROM direct_chat_messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;

        let mut messages = stmt
            .query_map(params![chat_id.to_string(), limit], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn count_messages(&self, chat_id: ChatId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM direct_chat_messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let message_text: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(ChatMessage {
        id: MessageId(decode_uuid(0, &id)?),
        chat_id: ChatId(decode_uuid(1, &chat_id)?),
        sender_id: UserId(decode_uuid(2, &sender_id)?),
        message_text,
        created_at: decode_ts(4, &created_at)?,
        updated_at: decode_ts(5, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use parley_shared::models::{Chat, User};

    use super::*;

    fn setup() -> (Database, Chat) {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = User {
                id: UserId::new(),
                username: name.into(),
                created_at: Utc::now(),
            };
            db.insert_user(&user).unwrap();
            ids.push(user.id);
        }
        let chat = db.create_direct_chat(ids[0], ids[1]).unwrap();
        (db, chat)
    }

    fn message(chat: &Chat, offset_ms: i64, text: &str) -> ChatMessage {
        let at = Utc::now() + Duration::milliseconds(offset_ms);
        ChatMessage {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: chat.users[0].id,
            message_text: text.into(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn insert_and_list_oldest_first() {
        let (db, chat) = setup();
        db.insert_message(&message(&chat, 0, "one")).unwrap();
        db.insert_message(&message(&chat, 10, "two")).unwrap();
        db.insert_message(&message(&chat, 20, "three")).unwrap();

        let all = db.get_messages_for_chat(chat.id, 10).unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);

        // The window keeps the most recent ones.
        let last_two = db.get_messages_for_chat(chat.id, 2).unwrap();
        let texts: Vec<_> = last_two.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, ["two", "three"]);
        assert_eq!(db.count_messages(chat.id).unwrap(), 3);
    }

    #[test]
    fn insert_bumps_chat_updated_at() {
        let (db, chat) = setup();
        let msg = message(&chat, 5_000, "later");
        db.insert_message(&msg).unwrap();

        let reloaded = db.find_chat(chat.id).unwrap().unwrap();
        assert_eq!(
            reloaded.updated_at.timestamp_micros(),
            msg.created_at.timestamp_micros()
        );
    }

    #[test]
    fn insert_into_unknown_chat_fails() {
        let (db, chat) = setup();
        let mut msg = message(&chat, 0, "orphan");
        msg.chat_id = ChatId::new();
        assert!(db.insert_message(&msg).is_err());
        assert_eq!(db.count_messages(chat.id).unwrap(), 0);
    }
}
