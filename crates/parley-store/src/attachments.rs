//! Attachment ownership.
//!
//! Files live outside the database; this table only records who uploaded
//! each reference. A reference can be attached to one message, by its
//! uploader, and the row is released once no message points at it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use parley_shared::types::UserId;

use crate::database::{decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Record that `owner` uploaded the file behind `reference`.
    pub fn record_attachment(&self, reference: &str, owner: UserId, size: u64) -> Result<()> {
        if !self.user_exists(owner)? {
            return Err(StoreError::NotFound("User"));
        }
        self.conn().execute(
            "INSERT INTO attachments (reference, owner_id, size, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![reference, owner.to_string(), size as i64, encode_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn attachment_owner(&self, reference: &str) -> Result<Option<UserId>> {
        self.conn()
            .query_row(
                "SELECT owner_id FROM attachments WHERE reference = ?1",
                params![reference],
                |row| {
                    let raw: String = row.get(0)?;
                    decode_uuid(0, &raw).map(UserId)
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn attachment_in_use(&self, reference: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages WHERE attachment = ?1 LIMIT 1",
                params![reference],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Check that `sender` may put `reference` on a new message: they
    /// uploaded it and no message carries it yet.
    pub fn ensure_attachment_claimable(&self, reference: &str, sender: UserId) -> Result<()> {
        match self.attachment_owner(reference)? {
            None => return Err(StoreError::NotFound("Attachment")),
            Some(owner) if owner != sender => {
                return Err(StoreError::Forbidden(
                    "attachment was uploaded by another user".into(),
                ))
            }
            Some(_) => {}
        }
        if self.attachment_in_use(reference)? {
            return Err(StoreError::InvalidOperation(
                "attachment already belongs to a message".into(),
            ));
        }
        Ok(())
    }

    /// Drop the ownership row when no message references the file any more.
    ///
    /// Returns `true` when the row was removed, meaning the caller may delete
    /// the file itself.
    pub fn release_attachment(&self, reference: &str) -> Result<bool> {
        if self.attachment_in_use(reference)? {
            return Ok(false);
        }
        let affected = self.conn().execute(
            "DELETE FROM attachments WHERE reference = ?1",
            params![reference],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        db.upsert_user(a, "alice").unwrap();
        db.upsert_user(b, "bob").unwrap();
        (db, a, b)
    }

    #[test]
    fn only_the_uploader_can_attach_once() {
        let (db, a, b) = seeded();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        db.record_attachment("9d2e.png", a, 3).unwrap();

        assert!(matches!(
            db.append_message(id, b, None, Some("9d2e.png")),
            Err(StoreError::Forbidden(_))
        ));
        db.append_message(id, a, None, Some("9d2e.png")).unwrap();
        assert!(matches!(
            db.append_message(id, a, Some("again"), Some("9d2e.png")),
            Err(StoreError::InvalidOperation(_))
        ));
        assert!(matches!(
            db.append_message(id, a, None, Some("never-uploaded.png")),
            Err(StoreError::NotFound("Attachment"))
        ));
        assert_eq!(db.list_messages(id).unwrap().len(), 1);
    }

    #[test]
    fn release_waits_for_last_reference() {
        let (db, a, b) = seeded();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        db.record_attachment("77ab.jpg", a, 10).unwrap();
        let message = db.append_message(id, a, None, Some("77ab.jpg")).unwrap();

        assert!(!db.release_attachment("77ab.jpg").unwrap());
        assert_eq!(db.attachment_owner("77ab.jpg").unwrap(), Some(a));

        db.delete_message(id, message.id, a).unwrap();
        assert!(db.release_attachment("77ab.jpg").unwrap());
        assert_eq!(db.attachment_owner("77ab.jpg").unwrap(), None);
        assert!(!db.release_attachment("77ab.jpg").unwrap());
    }

    #[test]
    fn record_for_unknown_user_is_not_found() {
        let (db, _, _) = seeded();
        assert!(matches!(
            db.record_attachment("x.png", UserId::new(), 1),
            Err(StoreError::NotFound("User"))
        ));
    }
}
