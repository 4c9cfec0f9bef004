//! CRUD operations for [`User`] records.

use rusqlite::{params, OptionalExtension};

use parley_shared::models::User;
use parley_shared::types::UserId;

use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::Result;

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![user.id.to_string(), user.username, encode_ts(&user.created_at)],
        )?;
        Ok(())
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let username: String = row.get(1)?;
    let created_at: String = row.get(2)?;

    Ok(User {
        id: UserId(decode_uuid(0, &id)?),
        username,
        created_at: decode_ts(2, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn insert_and_find_user() {
        let db = Database::open_in_memory().unwrap();
        let user = User {
            id: UserId::new(),
            username: "alice".into(),
            created_at: Utc::now(),
        };
        db.insert_user(&user).unwrap();

        let found = db.find_user(user.id).unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.username, "alice");
        assert!(db.find_user(UserId::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        let make = || User {
            id: UserId::new(),
            username: "same".into(),
            created_at: Utc::now(),
        };
        db.insert_user(&make()).unwrap();
        assert!(db.insert_user(&make()).is_err());
    }
}
