//! Conversation resolution and per-user visibility.
//!
//! A direct conversation is keyed by the unordered pair of its participants.
//! The unique index on `pair_key` is what keeps it canonical: resolution
//! inserts with `OR IGNORE` and then reads back whichever row won, so two
//! participants resolving each other at the same moment land on one record.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use parley_shared::types::{pair_key, ConversationId, MessageId, UserId};

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ResolvedConversation};

const CONVERSATION_COLUMNS: &str =
    "id, user_a, user_b, is_group, latest_message_id, created_at, chat_name";

impl Database {
    // ------------------------------------------------------------------
    // Resolve
    // ------------------------------------------------------------------

    /// Find or create the conversation between `requester` and `counterparty`
    /// and return it with the history visible to `requester`.
    pub fn resolve_conversation(
        &self,
        requester: UserId,
        counterparty: UserId,
    ) -> Result<ResolvedConversation> {
        if requester == counterparty {
            return Err(StoreError::InvalidOperation(
                "cannot open a conversation with yourself".into(),
            ));
        }
        let requester_name = self.get_user(requester)?.username;
        let counterparty_name = match self.get_user(counterparty) {
            Ok(user) => user.username,
            Err(StoreError::NotFound(_)) => return Err(StoreError::NotFound("Receiver")),
            Err(e) => return Err(e),
        };

        let key = pair_key(requester, counterparty);
        let (user_a, user_b) = if requester <= counterparty {
            (requester, counterparty)
        } else {
            (counterparty, requester)
        };

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO conversations
                 (id, pair_key, user_a, user_b, is_group, latest_message_id, created_at, chat_name)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6)",
            params![
                ConversationId::new().to_string(),
                key,
                user_a.to_string(),
                user_b.to_string(),
                encode_ts(&Utc::now()),
                format!("{requester_name} & {counterparty_name}"),
            ],
        )?;

        let conversation = self
            .find_conversation_by_pair(requester, counterparty)?
            .ok_or(StoreError::NotFound("Conversation"))?;

        if inserted > 0 {
            tracing::debug!(conversation = %conversation.id, "created conversation");
        }

        let messages = if conversation.is_cleared_by(requester) {
            Vec::new()
        } else {
            self.list_messages(conversation.id)?
        };

        Ok(ResolvedConversation {
            conversation_id: conversation.id,
            name: conversation.name,
            messages,
            created: inserted > 0,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let mut conversation = self
            .conn()
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(not_found("Conversation"))?;
        conversation.deleted_by = self.cleared_by(id)?;
        Ok(conversation)
    }

    pub fn find_conversation_by_pair(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE pair_key = ?1 AND is_group = 0"
                ),
                params![pair_key(a, b)],
                row_to_conversation,
            )
            .optional()?;

        match found {
            Some(mut conversation) => {
                conversation.deleted_by = self.cleared_by(conversation.id)?;
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    /// Every conversation `user` participates in, newest first.
    pub fn list_conversations_for_user(&self, user: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            let mut conversation = row?;
            conversation.deleted_by = self.cleared_by(conversation.id)?;
            conversations.push(conversation);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Visibility
    // ------------------------------------------------------------------

    /// Hide the current history from `user` on future resolutions.
    ///
    /// Idempotent: returns `false` when the user had already cleared it.
    /// No message is removed.
    pub fn clear_conversation(&self, id: ConversationId, user: UserId) -> Result<bool> {
        let conversation = self.get_conversation(id)?;
        if !conversation.has_participant(user) {
            return Err(StoreError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        }

        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversation_clears (conversation_id, user_id, cleared_at)
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), user.to_string(), encode_ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    fn cleared_by(&self, id: ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_clears
             WHERE conversation_id = ?1
             ORDER BY cleared_at ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let raw: String = row.get(0)?;
            decode_uuid(0, &raw).map(UserId)
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Conversation`] with an empty `deleted_by`.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let user_a_str: String = row.get(1)?;
    let user_b_str: String = row.get(2)?;
    let is_group: bool = row.get(3)?;
    let latest_str: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;
    let name: String = row.get(6)?;

    let latest_message_id = latest_str
        .map(|s| decode_uuid(4, &s).map(MessageId))
        .transpose()?;

    Ok(Conversation {
        id: ConversationId(decode_uuid(0, &id_str)?),
        name,
        participants: [
            UserId(decode_uuid(1, &user_a_str)?),
            UserId(decode_uuid(2, &user_b_str)?),
        ],
        is_group,
        latest_message_id,
        deleted_by: Vec::new(),
        created_at: decode_ts(5, &created_str)?,
    })
}
