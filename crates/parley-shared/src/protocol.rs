use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

/// Events a connected client sends over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to an identity and go online.
    AnnounceOnline { user_id: UserId },

    /// Subscribe to a conversation's topic.
    JoinConversation { conversation_id: ConversationId },

    /// The sender is composing a message.
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// Persist a message and deliver it to the other participant.
    MessageSent {
        conversation_id: ConversationId,
        message: MessageDraft,
    },
}

/// Events the server pushes to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Another user went online or offline.
    PresenceChanged { user_id: UserId, online: bool },

    /// A participant of a joined conversation is typing.
    TypingIndicator {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// A new message was persisted in a joined conversation.
    MessageDelivered {
        conversation_id: ConversationId,
        message: ChatMessage,
    },

    /// Confirms a `message-sent` to the connection that sent it.
    MessageAck {
        conversation_id: ConversationId,
        message: ChatMessage,
    },

    /// A client event could not be processed.
    Error { message: String },
}

/// Message content as submitted by a client, before persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

/// A persisted message as seen on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
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

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::PresenceChanged { .. } => "presence-changed",
            ServerEvent::TypingIndicator { .. } => "typing-indicator",
            ServerEvent::MessageDelivered { .. } => "message-delivered",
            ServerEvent::MessageAck { .. } => "message-ack",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_shape() {
        let conversation = ConversationId::new();
        let raw = format!(
            r#"{{"type":"join-conversation","conversationId":"{}"}}"#,
            conversation
        );
        let event = ClientEvent::from_json(&raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinConversation {
                conversation_id: conversation
            }
        );
    }

    #[test]
    fn test_message_sent_without_attachment() {
        let conversation = ConversationId::new();
        let raw = format!(
            r#"{{"type":"message-sent","conversationId":"{}","message":{{"content":"hi"}}}}"#,
            conversation
        );
        match ClientEvent::from_json(&raw).unwrap() {
            ClientEvent::MessageSent { message, .. } => {
                assert_eq!(message.content.as_deref(), Some("hi"));
                assert!(message.attachment.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_tagging() {
        let user = UserId::new();
        let json = ServerEvent::PresenceChanged {
            user_id: user,
            online: true,
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "presence-changed");
        assert_eq!(value["userId"], user.to_string());
        assert_eq!(value["online"], true);
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientEvent::from_json(r#"{"type":"shout"}"#).is_err());
    }
}
