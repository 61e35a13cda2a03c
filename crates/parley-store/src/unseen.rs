//! Unseen-message index.
//!
//! Nothing is stored here: counts are derived from the `seen` flag on each
//! message every time they are asked for.

use rusqlite::params;
use parley_shared::types::{ConversationId, MessageId, UserId};

use crate::database::{decode_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::UnseenSummary;

impl Database {
    /// Conversations of `user` holding counterparty messages not yet seen,
    /// most recent activity first. Conversations with nothing pending are
    /// left out.
    pub fn unseen_for(&self, user: UserId) -> Result<Vec<UnseenSummary>> {
        if !self.user_exists(user)? {
            return Err(StoreError::NotFound("User"));
        }

        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.user_a, c.user_b, c.latest_message_id, COUNT(m.id), c.chat_name
             FROM conversations c
             JOIN messages m
               ON m.conversation_id = c.id
              AND m.sender_id != ?1
              AND m.seen = 0
             WHERE c.user_a = ?1 OR c.user_b = ?1
             GROUP BY c.id
             ORDER BY MAX(m.created_at) DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let a_str: String = row.get(1)?;
            let b_str: String = row.get(2)?;
            let latest_str: Option<String> = row.get(3)?;
            let count: i64 = row.get(4)?;
            let name: String = row.get(5)?;

            let a = UserId(decode_uuid(1, &a_str)?);
            let b = UserId(decode_uuid(2, &b_str)?);
            let latest = latest_str
                .map(|s| decode_uuid(3, &s).map(MessageId))
                .transpose()?;

            Ok((
                ConversationId(decode_uuid(0, &id_str)?),
                if a == user { b } else { a },
                latest,
                count,
                name,
            ))
        })?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }

        let mut summaries = Vec::with_capacity(pending.len());
        for (conversation_id, counterparty_id, latest, count, name) in pending {
            let latest_message = match latest {
                Some(id) => match self.get_message(id) {
                    Ok(message) => Some(message),
                    Err(StoreError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                },
                None => None,
            };
            summaries.push(UnseenSummary {
                conversation_id,
                name,
                unseen_count: count as u64,
                counterparty_id,
                latest_message,
            });
        }
        Ok(summaries)
    }

    /// Mark every message in the conversation that `user` did not author as
    /// seen. Returns how many flipped; a repeat call returns 0.
    pub fn mark_seen(&self, conversation_id: ConversationId, user: UserId) -> Result<usize> {
        let conversation = self.get_conversation(conversation_id)?;
        if !conversation.has_participant(user) {
            return Err(StoreError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        }

        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1
             WHERE conversation_id = ?1 AND sender_id != ?2 AND seen = 0",
            params![conversation_id.to_string(), user.to_string()],
        )?;
        Ok(affected)
    }

    /// Number of counterparty messages `user` has not seen in one conversation.
    pub fn unseen_count(&self, conversation_id: ConversationId, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND sender_id != ?2 AND seen = 0",
            params![conversation_id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
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
    fn hi_scenario() {
        let (db, a, b) = seeded();
        let opened = db.resolve_conversation(a, b).unwrap();
        assert!(opened.messages.is_empty());

        db.append_message(opened.conversation_id, a, Some("hi"), None)
            .unwrap();

        let seen_by_b = db.resolve_conversation(b, a).unwrap();
        assert_eq!(seen_by_b.conversation_id, opened.conversation_id);
        assert_eq!(seen_by_b.messages.len(), 1);
        let msg = &seen_by_b.messages[0];
        assert_eq!(msg.sender, a);
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert!(!msg.seen);

        let unseen = db.unseen_for(b).unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].unseen_count, 1);
        assert_eq!(unseen[0].counterparty_id, a);
        assert_eq!(unseen[0].name, "alice & bob");
        assert_eq!(
            unseen[0].latest_message.as_ref().map(|m| m.id),
            Some(msg.id)
        );

        // A never counts its own message.
        assert!(db.unseen_for(a).unwrap().is_empty());

        assert_eq!(db.mark_seen(opened.conversation_id, b).unwrap(), 1);
        assert!(db.unseen_for(b).unwrap().is_empty());
        assert!(db.unseen_for(a).unwrap().is_empty());
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let (db, a, b) = seeded();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        db.append_message(id, a, Some("one"), None).unwrap();
        db.append_message(id, a, Some("two"), None).unwrap();

        assert_eq!(db.mark_seen(id, b).unwrap(), 2);
        assert_eq!(db.unseen_count(id, b).unwrap(), 0);
        assert_eq!(db.mark_seen(id, b).unwrap(), 0);
        assert_eq!(db.unseen_count(id, b).unwrap(), 0);
    }

    #[test]
    fn mark_seen_leaves_own_messages() {
        let (db, a, b) = seeded();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        db.append_message(id, a, Some("from a"), None).unwrap();
        db.append_message(id, b, Some("from b"), None).unwrap();

        assert_eq!(db.mark_seen(id, b).unwrap(), 1);
        assert_eq!(db.unseen_count(id, a).unwrap(), 1);
        assert_eq!(db.unseen_for(a).unwrap()[0].unseen_count, 1);
    }

    #[test]
    fn unseen_spans_conversations() {
        let (db, a, b) = seeded();
        let c = UserId::new();
        db.upsert_user(c, "carol").unwrap();

        let ab = db.resolve_conversation(a, b).unwrap().conversation_id;
        let ac = db.resolve_conversation(a, c).unwrap().conversation_id;
        db.append_message(ab, b, Some("1"), None).unwrap();
        db.append_message(ab, b, Some("2"), None).unwrap();
        db.append_message(ac, c, Some("3"), None).unwrap();

        let unseen = db.unseen_for(a).unwrap();
        assert_eq!(unseen.len(), 2);
        // Most recent activity first.
        assert_eq!(unseen[0].conversation_id, ac);
        assert_eq!(unseen[0].unseen_count, 1);
        assert_eq!(unseen[1].conversation_id, ab);
        assert_eq!(unseen[1].unseen_count, 2);
    }

    #[test]
    fn unseen_for_unknown_user_is_not_found() {
        let (db, a, b) = seeded();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;
        db.append_message(id, a, Some("hi"), None).unwrap();

        assert!(matches!(
            db.unseen_for(UserId::new()),
            Err(StoreError::NotFound("User"))
        ));
    }

    #[test]
    fn mark_seen_checks_membership() {
        let (db, a, b) = seeded();
        let eve = UserId::new();
        db.upsert_user(eve, "eve").unwrap();
        let id = db.resolve_conversation(a, b).unwrap().conversation_id;

        assert!(matches!(db.mark_seen(id, eve), Err(StoreError::Forbidden(_))));
        assert!(matches!(
            db.mark_seen(ConversationId::new(), a),
            Err(StoreError::NotFound("Conversation"))
        ));
    }
}
