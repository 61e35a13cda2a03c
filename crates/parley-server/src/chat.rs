//! Chat operations shared by the REST handlers and the realtime gateway.

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConversationId, MessageId, UserId};
use parley_store::{Message, ResolvedConversation, UnseenSummary};
use tracing::{debug, info, warn};

use crate::attachments::AttachmentStore;
use crate::broadcaster::Broadcaster;
use crate::db::DbHandle;
use crate::error::ServerError;

#[derive(Clone)]
pub struct ChatService {
    db: DbHandle,
    broadcaster: Broadcaster,
    attachments: AttachmentStore,
}

impl ChatService {
    pub fn new(db: DbHandle, broadcaster: Broadcaster, attachments: AttachmentStore) -> Self {
        Self {
            db,
            broadcaster,
            attachments,
        }
    }

    #[cfg(test)]
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Save an uploaded file and record `owner` as its uploader. Only the
    /// owner can later put the returned reference on a message.
    pub async fn upload(
        &self,
        owner: UserId,
        data: &[u8],
        file_name: Option<&str>,
    ) -> Result<String, ServerError> {
        let reference = self.attachments.store(data, file_name).await?;
        let size = data.len() as u64;

        let recorded = {
            let reference = reference.clone();
            self.db
                .run("record_attachment", move |db| {
                    db.record_attachment(&reference, owner, size)
                })
                .await
        };
        if let Err(e) = recorded {
            self.remove_file(&reference).await;
            return Err(e);
        }

        debug!(reference = %reference, owner = %owner.short(), size, "Attachment uploaded");
        Ok(reference)
    }

    /// Undo an upload whose message was never stored.
    pub async fn discard_upload(&self, reference: &str) {
        let released = {
            let reference = reference.to_string();
            self.db
                .run("release_attachment", move |db| db.release_attachment(&reference))
                .await
        };
        match released {
            Ok(true) => self.remove_file(reference).await,
            Ok(false) => {}
            Err(e) => warn!(reference = %reference, error = %e, "Failed to release attachment"),
        }
    }

    async fn remove_file(&self, reference: &str) {
        if let Err(e) = self.attachments.delete(reference).await {
            warn!(reference = %reference, error = %e, "Failed to remove attachment file");
        }
    }

    pub async fn resolve(
        &self,
        requester: UserId,
        counterparty: UserId,
    ) -> Result<ResolvedConversation, ServerError> {
        let resolved = self
            .db
            .run("resolve_conversation", move |db| {
                db.resolve_conversation(requester, counterparty)
            })
            .await?;

        if resolved.created {
            info!(
                conversation = %resolved.conversation_id,
                requester = %requester.short(),
                counterparty = %counterparty.short(),
                "Conversation created"
            );
        }
        Ok(resolved)
    }

    /// Persist a message and deliver it to the conversation's other
    /// subscribers.
    pub async fn send(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: Option<String>,
        attachment: Option<String>,
    ) -> Result<Message, ServerError> {
        let message = self
            .db
            .run("append_message", move |db| {
                db.append_message(conversation, sender, content.as_deref(), attachment.as_deref())
            })
            .await?;

        let delivered = self
            .broadcaster
            .publish(
                conversation,
                ServerEvent::MessageDelivered {
                    conversation_id: conversation,
                    message: message.clone().into(),
                },
                sender,
            )
            .await;

        debug!(
            conversation = %conversation,
            message = %message.id,
            delivered,
            "Message sent"
        );
        Ok(message)
    }

    pub async fn clear(&self, conversation: ConversationId, user: UserId) -> Result<bool, ServerError> {
        let changed = self
            .db
            .run("clear_conversation", move |db| db.clear_conversation(conversation, user))
            .await?;
        if changed {
            info!(conversation = %conversation, user = %user.short(), "Conversation cleared");
        }
        Ok(changed)
    }

    pub async fn unseen(&self, user: UserId) -> Result<Vec<UnseenSummary>, ServerError> {
        self.db.run("unseen_for", move |db| db.unseen_for(user)).await
    }

    pub async fn mark_seen(&self, conversation: ConversationId, user: UserId) -> Result<usize, ServerError> {
        let updated = self
            .db
            .run("mark_seen", move |db| db.mark_seen(conversation, user))
            .await?;
        debug!(conversation = %conversation, user = %user.short(), updated, "Marked seen");
        Ok(updated)
    }

    /// Remove a message sent by `requester`. Its attachment file goes too
    /// once no other message references it.
    pub async fn delete_message(
        &self,
        conversation: ConversationId,
        message: MessageId,
        requester: UserId,
    ) -> Result<Message, ServerError> {
        let (removed, released) = self
            .db
            .run("delete_message", move |db| {
                let removed = db.delete_message(conversation, message, requester)?;
                let released = match removed.attachment.as_deref() {
                    Some(reference) => db.release_attachment(reference)?,
                    None => false,
                };
                Ok((removed, released))
            })
            .await?;

        if let (Some(reference), true) = (&removed.attachment, released) {
            self.remove_file(reference).await;
        }

        info!(conversation = %conversation, message = %message, "Message deleted");
        Ok(removed)
    }

    /// Relay a typing signal to the conversation's other subscribers.
    /// Signals between users who blocked each other are dropped.
    pub async fn typing(&self, conversation: ConversationId, user: UserId) -> Result<usize, ServerError> {
        let blocked = self
            .db
            .run("typing_check", move |db| {
                let conv = db.get_conversation(conversation)?;
                match conv.counterparty(user) {
                    Some(other) => db.is_blocked_between(user, other),
                    None => Err(parley_store::StoreError::Forbidden(
                        "you are not a member of this chat".into(),
                    )),
                }
            })
            .await?;
        if blocked {
            return Ok(0);
        }

        Ok(self
            .broadcaster
            .publish(
                conversation,
                ServerEvent::TypingIndicator {
                    conversation_id: conversation,
                    user_id: user,
                },
                user,
            )
            .await)
    }

    /// Check that `user` takes part in `conversation`.
    pub async fn ensure_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<(), ServerError> {
        let conv = self
            .db
            .run("get_conversation", move |db| db.get_conversation(conversation))
            .await?;
        if conv.has_participant(user) {
            Ok(())
        } else {
            Err(ServerError::Forbidden("you are not a member of this chat".into()))
        }
    }
}
