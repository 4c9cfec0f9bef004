//! CRUD operations for direct chats and their membership.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::models::Chat;
use parley_shared::types::{ChatId, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::users::row_to_user;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a direct chat between two distinct, existing users.
    pub fn create_direct_chat(&self, first: UserId, second: UserId) -> Result<Chat> {
        if first == second {
            return Err(StoreError::InvalidChat(
                "a direct chat needs two different users".into(),
            ));
        }

        let id = ChatId::new();
        let now = encode_ts(&Utc::now());

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO direct_chats (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![id.to_string(), now],
        )?;
        for (position, user_id) in [first, second].iter().enumerate() {
            tx.execute(
                "INSERT INTO direct_chat_members (chat_id, user_id, position)
                 VALUES (?1, ?2, ?3)",
                params![id.to_string(), user_id.to_string(), position as i64],
            )?;
        }
        tx.commit()?;

        self.find_chat(id)?.ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a chat together with its members.
    pub fn find_chat(&self, id: ChatId) -> Result<Option<Chat>> {
        let header = self
            .conn()
            .query_row(
                "SELECT created_at, updated_at FROM direct_chats WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let created_at: String = row.get(0)?;
                    let updated_at: String = row.get(1)?;
                    Ok((decode_ts(0, &created_at)?, decode_ts(1, &updated_at)?))
                },
            )
            .optional()?;

        let Some((created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.created_at
             FROM direct_chat_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.chat_id = ?1
             ORDER BY m.position ASC",
        )?;
        let users = stmt
            .query_map(params![id.to_string()], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Chat {
            id,
            created_at,
            updated_at,
            users,
        }))
    }
}
