//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so handlers can return it as JSON as-is.

use chrono::{DateTime, Utc};
use parley_shared::protocol::ChatMessage;
use parley_shared::types::{ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user record mirrored from the account collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Maintained by the presence registry.
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The canonical two-party thread between a fixed pair of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// Display name, "<creator> & <counterparty>" at creation time.
    #[serde(rename = "chatName")]
    pub name: String,
    /// Both participants, lower id first.
    pub participants: [UserId; 2],
    /// Reserved; always `false`.
    pub is_group: bool,
    pub latest_message_id: Option<MessageId>,
    /// Participants that cleared their view of the history.
    pub deleted_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    /// The other participant, if `user` is one of the two.
    pub fn counterparty(&self, user: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn is_cleared_by(&self, user: UserId) -> bool {
        self.deleted_by.contains(&user)
    }
}

/// Result of resolving a conversation for one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConversation {
    #[serde(rename = "chatId")]
    pub conversation_id: ConversationId,
    #[serde(rename = "chatName")]
    pub name: String,
    /// Oldest first; empty when the requester has cleared the conversation.
    pub messages: Vec<Message>,
    #[serde(skip)]
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ChatMessage {
    fn from(m: Message) -> Self {
        ChatMessage {
            id: m.id,
            conversation_id: m.conversation_id,
            sender: m.sender,
            content: m.content,
            attachment: m.attachment,
            seen: m.seen,
            created_at: m.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Unseen summary
// ---------------------------------------------------------------------------

/// Per-conversation count of messages waiting for the user to read them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnseenSummary {
    #[serde(rename = "chatId")]
    pub conversation_id: ConversationId,
    #[serde(rename = "chatName")]
    pub name: String,
    pub unseen_count: u64,
    #[serde(rename = "receiverId")]
    pub counterparty_id: UserId,
    pub latest_message: Option<Message>,
}
