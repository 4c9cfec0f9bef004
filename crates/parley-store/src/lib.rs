//! # parley-store
//!
//! SQLite persistence for users, direct chats and their messages.
//!
//! Message text is stored exactly as handed in: the server encrypts before
//! anything reaches this crate, so the `message_text` column only ever holds
//! ciphertext. The synchronous [`Database`] carries the typed CRUD helpers;
//! [`SqliteRepository`] puts it behind the async repository traits the server
//! consumes.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod repository;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use repository::{ChatRepository, SqliteRepository, UserRepository};
