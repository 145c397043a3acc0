//! Collaborator seams consumed by the messaging core, and their SQLite
//! implementation on [`Database`].
//!
//! The traits are synchronous; async callers go through [`blocking`] so the
//! database mutex is never held on a runtime worker thread.

use anyhow::Result;
use tracing::error;
use uuid::Uuid;

use kindred_db::Database;
use kindred_db::models::{MessageRow, NotificationRow, format_timestamp};
use kindred_types::ChatError;
use kindred_types::models::{
    ConversationSummary, Message, MessageStatus, Notification, UserProfile, UserSummary,
};

/// Existence and suspension lookup.
pub trait UserStore: Send + Sync {
    fn find_user(&self, id: Uuid) -> Result<Option<UserProfile>>;
}

/// Symmetric block lookup.
pub trait BlockStore: Send + Sync {
    fn is_blocked(&self, a: Uuid, b: Uuid) -> Result<bool>;
}

pub trait MessageStore: Send + Sync {
    fn save_message(&self, message: &Message) -> Result<()>;
    fn load_message(&self, id: Uuid) -> Result<Option<Message>>;
    /// Raise the status if it is lower; returns whether it changed.
    fn advance_status(&self, id: Uuid, status: MessageStatus) -> Result<bool>;
    /// Move every unread `sender -> reader` message to READ; returns changed ids.
    fn mark_read_from(&self, reader: Uuid, sender: Uuid) -> Result<Vec<Uuid>>;
    fn remove_message(&self, id: Uuid) -> Result<bool>;
    fn conversation(&self, a: Uuid, b: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>>;
    fn conversation_summaries(&self, user: Uuid) -> Result<Vec<ConversationSummary>>;
    fn unread_count(&self, user: Uuid) -> Result<u64>;
}

pub trait NotificationStore: Send + Sync {
    fn save_notification(&self, notification: &Notification) -> Result<()>;
    fn notifications(&self, user: Uuid, limit: u32, offset: u32) -> Result<Vec<Notification>>;
    fn unread_notification_count(&self, user: Uuid) -> Result<u64>;
    /// Returns false if the notification does not exist or is not the user's.
    fn acknowledge_notification(&self, id: Uuid, user: Uuid) -> Result<bool>;
}

/// Run a store call off the async runtime, mapping failures to `Internal`.
pub async fn blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::internal("storage task failed")
        })?
        .map_err(|e| {
            error!("Storage error: {:#}", e);
            ChatError::internal("storage failure")
        })
}

impl UserStore for Database {
    fn find_user(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.get_user_by_id(&id.to_string())?
            .map(|row| row.into_profile())
            .transpose()
    }
}

impl BlockStore for Database {
    fn is_blocked(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.is_blocked_pair(&a.to_string(), &b.to_string())
    }
}

impl MessageStore for Database {
    fn save_message(&self, message: &Message) -> Result<()> {
        Database::insert_message(
            self,
            &MessageRow {
                id: message.id.to_string(),
                sender_id: message.sender_id.to_string(),
                receiver_id: message.receiver_id.to_string(),
                content: message.content.clone(),
                media_url: message.media_url.clone(),
                media_type: message.media_type.clone(),
                status: message.status.ordinal(),
                created_at: format_timestamp(message.created_at),
            },
        )
    }

    fn load_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.get_message(&id.to_string())?
            .map(|row| row.into_message())
            .transpose()
    }

    fn advance_status(&self, id: Uuid, status: MessageStatus) -> Result<bool> {
        self.advance_message_status(&id.to_string(), status.ordinal())
    }

    fn mark_read_from(&self, reader: Uuid, sender: Uuid) -> Result<Vec<Uuid>> {
        self.mark_conversation_read(&reader.to_string(), &sender.to_string())?
            .iter()
            .map(|id| id.parse::<Uuid>().map_err(anyhow::Error::from))
            .collect()
    }

    fn remove_message(&self, id: Uuid) -> Result<bool> {
        Database::delete_message(self, &id.to_string())
    }

    fn conversation(&self, a: Uuid, b: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>> {
        self.list_conversation(&a.to_string(), &b.to_string(), limit, offset)?
            .into_iter()
            .map(|row| row.into_message())
            .collect()
    }

    fn conversation_summaries(&self, user: Uuid) -> Result<Vec<ConversationSummary>> {
        self.list_conversation_summaries(&user.to_string())?
            .into_iter()
            .map(|row| -> Result<ConversationSummary> {
                Ok(ConversationSummary {
                    counterpart: UserSummary {
                        id: row.counterpart_id.parse()?,
                        username: row.counterpart_username,
                    },
                    last_message: row.last_message.into_message()?,
                    unread_count: row.unread_count.max(0) as u64,
                })
            })
            .collect()
    }

    fn unread_count(&self, user: Uuid) -> Result<u64> {
        Ok(self.count_unread_messages(&user.to_string())?.max(0) as u64)
    }
}

impl NotificationStore for Database {
    fn save_notification(&self, n: &Notification) -> Result<()> {
        self.insert_notification(&NotificationRow {
            id: n.id.to_string(),
            user_id: n.user_id.to_string(),
            actor_id: n.actor_id.map(|id| id.to_string()),
            kind: n.kind.clone(),
            payload: n.payload.to_string(),
            is_read: n.is_read,
            created_at: format_timestamp(n.created_at),
        })
    }

    fn notifications(&self, user: Uuid, limit: u32, offset: u32) -> Result<Vec<Notification>> {
        self.list_notifications(&user.to_string(), limit, offset)?
            .into_iter()
            .map(|row| row.into_notification())
            .collect()
    }

    fn unread_notification_count(&self, user: Uuid) -> Result<u64> {
        Ok(self.count_unread_notifications(&user.to_string())?.max(0) as u64)
    }

    fn acknowledge_notification(&self, id: Uuid, user: Uuid) -> Result<bool> {
        self.mark_notification_read(&id.to_string(), &user.to_string())
    }
}
