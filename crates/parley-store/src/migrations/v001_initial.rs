//! v001 -- Initial schema creation.
//!
//! Creates `users`, `direct_chats`, `direct_chat_members` and
//! `direct_chat_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username   TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL                -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Direct chats (exactly two members)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_chats (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS direct_chat_members (
    chat_id  TEXT NOT NULL,                 -- FK -> direct_chats(id)
    user_id  TEXT NOT NULL,                 -- FK -> users(id)
    position INTEGER NOT NULL,              -- 0 or 1, keeps member order stable

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES direct_chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_direct_chat_members_user ON direct_chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_chat_messages (
    id           TEXT PRIMARY KEY NOT NULL, -- UUID v4
    chat_id      TEXT NOT NULL,             -- FK -> direct_chats(id)
    sender_id    TEXT NOT NULL,             -- FK -> users(id)
    message_text TEXT NOT NULL,             -- base64(salt || iv || ciphertext)
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES direct_chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_direct_chat_messages_chat_ts
    ON direct_chat_messages(chat_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
