//! # parley-store
//!
//! SQLite storage for the Parley chat core.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for conversation
//! resolution, message persistence, per-user visibility, the unseen index,
//! attachment ownership, and the user records the chat core reads from the account collaborator.

pub mod attachments;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod unseen;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
