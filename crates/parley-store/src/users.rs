//! User records and block relationships.
//!
//! The account collaborator owns these rows; the chat core only reads them,
//! except for the online flag which the presence registry maintains.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use parley_shared::types::UserId;

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, Database};
use crate::error::Result;
use crate::models::User;

impl Database {
    /// Insert a user, or refresh the username of an existing one.
    pub fn upsert_user(&self, id: UserId, username: &str) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, username, is_online, created_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![id.to_string(), username, encode_ts(&Utc::now())],
        )?;
        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, is_online, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found("User"))
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Set the online flag. Returns `false` when the user is unknown.
    pub fn set_user_online(&self, id: UserId, online: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?1 WHERE id = ?2",
            params![online, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Reset every online flag, used at startup since no connection survives
    /// a restart.
    pub fn reset_presence(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("UPDATE users SET is_online = 0 WHERE is_online = 1", [])?)
    }

    /// Record that `blocker` blocked `blocked`. Returns `false` if it already was.
    pub fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO user_blocks (blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![blocker.to_string(), blocked.to_string(), encode_ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    pub fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker.to_string(), blocked.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// True when either user has blocked the other.
    pub fn is_blocked_between(&self, a: UserId, b: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM user_blocks
                 WHERE (blocker_id = ?1 AND blocked_id = ?2)
                    OR (blocker_id = ?2 AND blocked_id = ?1)
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let is_online: bool = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(User {
        id: UserId(decode_uuid(0, &id_str)?),
        username,
        is_online,
        created_at: decode_ts(3, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn upsert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();

        let user = db.upsert_user(id, "alice").unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.is_online);

        let renamed = db.upsert_user(id, "alice2").unwrap();
        assert_eq!(renamed.username, "alice2");
        assert_eq!(renamed.created_at, user.created_at);
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound("User"))
        ));
        assert!(!db.user_exists(UserId::new()).unwrap());
    }

    #[test]
    fn online_flag_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();
        db.upsert_user(id, "bob").unwrap();

        assert!(db.set_user_online(id, true).unwrap());
        assert!(db.get_user(id).unwrap().is_online);
        assert_eq!(db.reset_presence().unwrap(), 1);
        assert!(!db.get_user(id).unwrap().is_online);
        assert!(!db.set_user_online(UserId::new(), true).unwrap());
    }

    #[test]
    fn blocking_is_checked_both_ways() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        db.upsert_user(a, "a").unwrap();
        db.upsert_user(b, "b").unwrap();

        assert!(!db.is_blocked_between(a, b).unwrap());
        assert!(db.block_user(b, a).unwrap());
        assert!(!db.block_user(b, a).unwrap());
        assert!(db.is_blocked_between(a, b).unwrap());
        assert!(db.is_blocked_between(b, a).unwrap());

        assert!(db.unblock_user(b, a).unwrap());
        assert!(!db.is_blocked_between(a, b).unwrap());
    }
}
