use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use parley_shared::types::{ConversationId, MessageId, UserId};

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, attachment, seen, created_at";

impl Database {
    /// Append a message to a conversation and make it the latest one.
    ///
    /// Content is trimmed; blank content counts as absent. At least one of
    /// content and attachment must remain, and an attachment must have been
    /// uploaded by `sender` and not yet used.
    pub fn append_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        content: Option<&str>,
        attachment: Option<&str>,
    ) -> Result<Message> {
        let conversation = self.get_conversation(conversation_id)?;

        let content = non_blank(content);
        let attachment = non_blank(attachment);
        if content.is_none() && attachment.is_none() {
            return Err(StoreError::InvalidOperation(
                "message must have text or an attachment".into(),
            ));
        }

        let Some(counterparty) = conversation.counterparty(sender) else {
            return Err(StoreError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        };
        if self.is_blocked_between(sender, counterparty)? {
            return Err(StoreError::Forbidden(
                "messaging is blocked between these users".into(),
            ));
        }
        if let Some(reference) = attachment.as_deref() {
            self.ensure_attachment_claimable(reference, sender)?;
        }

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender,
            content,
            attachment,
            seen: false,
            created_at: Utc::now(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, attachment, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                message.id.to_string(),
                conversation_id.to_string(),
                sender.to_string(),
                message.content,
                message.attachment,
                encode_ts(&message.created_at),
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET latest_message_id = ?1 WHERE id = ?2",
            params![message.id.to_string(), conversation_id.to_string()],
        )?;
        tx.commit()?;

        // Re-read so the timestamp carries the stored precision.
        self.get_message(message.id)
    }

    /// Full history of a conversation, oldest first.
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found("Message"))
    }

    /// Permanently remove a message.
    ///
    /// The message must belong to `conversation_id` and only its sender may
    /// remove it. If it was the conversation's latest message, the pointer
    /// moves to the newest remaining one.
    pub fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<Message> {
        let conversation = self.get_conversation(conversation_id)?;

        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE id = ?1 AND conversation_id = ?2"
                ),
                params![message_id.to_string(), conversation_id.to_string()],
                row_to_message,
            )
            .map_err(not_found("Message"))?;

        if message.sender != requester {
            return Err(StoreError::Forbidden(
                "only the sender can delete a message".into(),
            ));
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE id = ?1",
            params![message_id.to_string()],
        )?;
        if conversation.latest_message_id == Some(message_id) {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT id FROM messages WHERE conversation_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    params![conversation_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "UPDATE conversations SET latest_message_id = ?1 WHERE id = ?2",
                params![previous, conversation_id.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(message)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: Option<String> = row.get(3)?;
    let attachment: Option<String> = row.get(4)?;
    let seen: bool = row.get(5)?;
    let ts_str: String = row.get(6)?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        conversation_id: ConversationId(decode_uuid(1, &conversation_str)?),
        sender: UserId(decode_uuid(2, &sender_str)?),
        content,
        attachment,
        seen,
        created_at: decode_ts(6, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> (Database, ConversationId, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        db.upsert_user(a, "alice").unwrap();
        db.upsert_user(b, "bob").unwrap();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        (db, id, a, b)
    }

    #[test]
    fn append_sets_latest_and_trims() {
        let (db, id, a, _) = chat();
        let message = db.append_message(id, a, Some("  hi  "), None).unwrap();

        assert_eq!(message.content.as_deref(), Some("hi"));
        assert!(!message.seen);
        assert_eq!(
            db.get_conversation(id).unwrap().latest_message_id,
            Some(message.id)
        );
    }

    #[test]
    fn empty_message_is_rejected() {
        let (db, id, a, _) = chat();
        for content in [None, Some(""), Some("   \n")] {
            assert!(matches!(
                db.append_message(id, a, content, None),
                Err(StoreError::InvalidOperation(_))
            ));
        }
        assert!(db.list_messages(id).unwrap().is_empty());
    }

    #[test]
    fn attachment_only_message() {
        let (db, id, a, _) = chat();
        db.record_attachment("3f1c.png", a, 4).unwrap();
        let message = db
            .append_message(id, a, Some(""), Some("3f1c.png"))
            .unwrap();
        assert!(message.content.is_none());
        assert_eq!(message.attachment.as_deref(), Some("3f1c.png"));
    }

    #[test]
    fn append_to_missing_conversation_is_not_found() {
        let (db, _, a, _) = chat();
        assert!(matches!(
            db.append_message(ConversationId::new(), a, Some("hi"), None),
            Err(StoreError::NotFound("Conversation"))
        ));
    }

    #[test]
    fn outsider_and_blocked_sends_are_forbidden() {
        let (db, id, a, b) = chat();
        let eve = UserId::new();
        db.upsert_user(eve, "eve").unwrap();
        assert!(matches!(
            db.append_message(id, eve, Some("hi"), None),
            Err(StoreError::Forbidden(_))
        ));

        db.block_user(b, a).unwrap();
        assert!(matches!(
            db.append_message(id, a, Some("hi"), None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.append_message(id, b, Some("hi"), None),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn history_keeps_append_order() {
        let (db, id, a, b) = chat();
        let first = db.append_message(id, a, Some("one"), None).unwrap();
        let second = db.append_message(id, b, Some("two"), None).unwrap();
        let third = db.append_message(id, a, Some("three"), None).unwrap();

        let ids: Vec<MessageId> = db.list_messages(id).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn delete_repoints_latest() {
        let (db, id, a, _) = chat();
        let first = db.append_message(id, a, Some("one"), None).unwrap();
        let second = db.append_message(id, a, Some("two"), None).unwrap();

        db.delete_message(id, second.id, a).unwrap();
        assert_eq!(
            db.get_conversation(id).unwrap().latest_message_id,
            Some(first.id)
        );

        db.delete_message(id, first.id, a).unwrap();
        assert_eq!(db.get_conversation(id).unwrap().latest_message_id, None);
        assert!(matches!(
            db.get_message(first.id),
            Err(StoreError::NotFound("Message"))
        ));
    }

    #[test]
    fn delete_checks_conversation_and_sender() {
        let (db, id, a, b) = chat();
        let message = db.append_message(id, a, Some("mine"), None).unwrap();

        let c = UserId::new();
        db.upsert_user(c, "carol").unwrap();
        let other = db.resolve_conversation(a, c).unwrap().conversation_id;

        assert!(matches!(
            db.delete_message(other, message.id, a),
            Err(StoreError::NotFound("Message"))
        ));
        assert!(matches!(
            db.delete_message(id, message.id, b),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.delete_message(id, MessageId::new(), a),
            Err(StoreError::NotFound("Message"))
        ));
        assert_eq!(db.list_messages(id).unwrap().len(), 1);
    }
}
