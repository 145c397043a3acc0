use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::ChatError;
use kindred_types::events::GatewayEvent;
use kindred_types::models::{ConversationSummary, Message, MessageStatus, UserProfile, UserSummary};

use crate::block_guard::BlockGuard;
use crate::fanout::NotificationFanout;
use crate::presence::PresenceRegistry;
use crate::store::{MessageStore, UserStore, blocking};

pub const DEFAULT_MAX_CONTENT_LEN: usize = 5000;

/// What a client asked to send, before it has an id or a status.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub receiver_id: Uuid,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub correlation_id: Option<String>,
}

impl SendOutcome {
    pub fn delivered(&self) -> bool {
        self.message.status >= MessageStatus::Delivered
    }

    /// Confirmation for the sending client, carrying its correlation id.
    pub fn ack(&self) -> GatewayEvent {
        if self.delivered() {
            GatewayEvent::MessageDelivered {
                message_id: self.message.id,
                correlation_id: self.correlation_id.clone(),
            }
        } else {
            GatewayEvent::MessageSent {
                message: self.message.clone(),
                correlation_id: self.correlation_id.clone(),
            }
        }
    }
}

/// Owns message creation and the SENT -> DELIVERED -> READ state machine.
///
/// Every status write is a conditional "raise if lower" update, so duplicate,
/// concurrent and out-of-order status events all converge on the highest
/// status requested. Pushes happen after the write and never fail the call.
#[derive(Clone)]
pub struct MessageLifecycleManager {
    users: Arc<dyn UserStore>,
    messages: Arc<dyn MessageStore>,
    blocks: BlockGuard,
    presence: PresenceRegistry,
    fanout: NotificationFanout,
    max_content_len: usize,
}

impl MessageLifecycleManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
        blocks: BlockGuard,
        presence: PresenceRegistry,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            users,
            messages,
            blocks,
            presence,
            fanout,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
        }
    }

    pub fn with_max_content_len(mut self, max_content_len: usize) -> Self {
        self.max_content_len = max_content_len;
        self
    }

    /// Store a new message and deliver it if the receiver is online.
    ///
    /// Both REST and WebSocket sends come through here, so an online
    /// receiver always gets the message promoted to DELIVERED.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        draft: MessageDraft,
        correlation_id: Option<String>,
    ) -> Result<SendOutcome, ChatError> {
        self.validate(sender_id, &draft)?;

        let sender = self.active_user(sender_id, "sender").await?;
        self.active_user(draft.receiver_id, "receiver").await?;
        self.blocks.ensure_not_blocked(sender_id, draft.receiver_id).await?;

        let mut message = Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content,
            media_url: draft.media_url,
            media_type: draft.media_type,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };

        let store = self.messages.clone();
        let row = message.clone();
        blocking(move || store.save_message(&row)).await?;

        let promoted = if self.presence.is_online(message.receiver_id) {
            self.promote(message.id).await
        } else {
            None
        };

        if let Some(status) = promoted {
            message.status = status;
            self.fanout.emit_to_user(
                message.receiver_id,
                GatewayEvent::NewMessage {
                    message: message.clone(),
                    sender: UserSummary::from(&sender),
                },
            );
        } else {
            self.record_offline_notification(&message, &sender).await;
        }

        debug!(
            "Message {} {} -> {} stored as {}",
            message.id, sender_id, message.receiver_id, message.status
        );

        Ok(SendOutcome {
            message,
            correlation_id,
        })
    }

    /// Advance a message's status on behalf of its receiver.
    ///
    /// Requests at or below the current status return the stored record
    /// untouched. Only a real advance is pushed to the sender.
    pub async fn update_status(
        &self,
        message_id: Uuid,
        requested: MessageStatus,
        acting_user_id: Uuid,
    ) -> Result<Message, ChatError> {
        let current = self.load(message_id).await?;

        if acting_user_id != current.receiver_id {
            return Err(ChatError::Unauthorized(
                "only the receiver can update message status".into(),
            ));
        }

        if requested <= current.status {
            return Ok(current);
        }

        let store = self.messages.clone();
        let advanced = blocking(move || store.advance_status(message_id, requested)).await?;
        if !advanced {
            // A concurrent update got there first; report what is stored now.
            return self.load(message_id).await;
        }

        let mut updated = current;
        updated.status = requested;

        let event = match requested {
            MessageStatus::Delivered => Some(GatewayEvent::MessageDelivered {
                message_id,
                correlation_id: None,
            }),
            MessageStatus::Read => Some(GatewayEvent::MessageRead {
                message_ids: vec![message_id],
                read_by: acting_user_id,
            }),
            MessageStatus::Sent => None,
        };
        if let Some(event) = event {
            self.fanout.emit_to_user(updated.sender_id, event);
        }

        Ok(updated)
    }

    /// Move every unread message from `other_user_id` to `user_id` to READ
    /// in one write and tell the sender once. Returns the ids that changed.
    pub async fn mark_conversation_as_read(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<Vec<Uuid>, ChatError> {
        let store = self.messages.clone();
        let message_ids = blocking(move || store.mark_read_from(user_id, other_user_id)).await?;

        if !message_ids.is_empty() {
            info!(
                "{} read {} messages from {}",
                user_id,
                message_ids.len(),
                other_user_id
            );
            self.fanout.emit_to_user(
                other_user_id,
                GatewayEvent::MessagesRead {
                    message_ids: message_ids.clone(),
                    read_by: user_id,
                },
            );
        }

        Ok(message_ids)
    }

    /// Delete a message. Only its sender may do this.
    pub async fn delete_message(&self, message_id: Uuid, requester_id: Uuid) -> Result<(), ChatError> {
        let message = self.load(message_id).await?;

        if requester_id != message.sender_id {
            return Err(ChatError::Unauthorized(
                "only the sender can delete a message".into(),
            ));
        }

        let store = self.messages.clone();
        if !blocking(move || store.remove_message(message_id)).await? {
            return Err(ChatError::NotFound("message not found".into()));
        }

        self.fanout.emit_to_users(
            &[message.sender_id, message.receiver_id],
            GatewayEvent::MessageDeleted { message_id },
        );
        Ok(())
    }

    // -- Pull-style reads --

    pub async fn conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, ChatError> {
        let store = self.messages.clone();
        blocking(move || store.conversation(user_id, other_user_id, limit, offset)).await
    }

    pub async fn conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, ChatError> {
        let store = self.messages.clone();
        blocking(move || store.conversation_summaries(user_id)).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, ChatError> {
        let store = self.messages.clone();
        blocking(move || store.unread_count(user_id)).await
    }

    // -- Internals --

    fn validate(&self, sender_id: Uuid, draft: &MessageDraft) -> Result<(), ChatError> {
        if draft.receiver_id == sender_id {
            return Err(ChatError::InvalidInput("cannot message yourself".into()));
        }
        if draft.content.trim().is_empty() && draft.media_url.is_none() {
            return Err(ChatError::InvalidInput("message is empty".into()));
        }
        if draft.content.chars().count() > self.max_content_len {
            return Err(ChatError::InvalidInput(format!(
                "message exceeds {} characters",
                self.max_content_len
            )));
        }
        if draft.media_type.is_some() && draft.media_url.is_none() {
            return Err(ChatError::InvalidInput("mediaType requires mediaUrl".into()));
        }
        Ok(())
    }

    async fn active_user(&self, user_id: Uuid, role: &str) -> Result<UserProfile, ChatError> {
        let store = self.users.clone();
        let user = blocking(move || store.find_user(user_id))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("{role} not found")))?;

        if user.is_suspended {
            return Err(ChatError::Forbidden(format!("{role} is suspended")));
        }
        Ok(user)
    }

    async fn load(&self, message_id: Uuid) -> Result<Message, ChatError> {
        let store = self.messages.clone();
        blocking(move || store.load_message(message_id))
            .await?
            .ok_or_else(|| ChatError::NotFound("message not found".into()))
    }

    /// Raise a freshly stored message to DELIVERED and return the status the
    /// store now holds. The row is already durable, so a failure here
    /// downgrades the ack to "sent" instead of failing the send.
    async fn promote(&self, message_id: Uuid) -> Option<MessageStatus> {
        let store = self.messages.clone();
        match blocking(move || store.advance_status(message_id, MessageStatus::Delivered)).await {
            Ok(true) => Some(MessageStatus::Delivered),
            // Already raised further by a racing status update.
            Ok(false) => match self.load(message_id).await {
                Ok(stored) => Some(stored.status),
                Err(e) => {
                    warn!("Could not reload message {} after promotion: {}", message_id, e);
                    None
                }
            },
            Err(e) => {
                warn!("Could not promote message {} to DELIVERED: {}", message_id, e);
                None
            }
        }
    }

    async fn record_offline_notification(&self, message: &Message, sender: &UserProfile) {
        let payload = serde_json::json!({
            "messageId": message.id,
            "senderUsername": sender.username,
        });
        if let Err(e) = self
            .fanout
            .notify(message.receiver_id, Some(message.sender_id), "new_message", payload)
            .await
        {
            warn!("Could not record notification for message {}: {}", message.id, e);
        }
    }
}
