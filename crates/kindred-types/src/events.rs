use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{Message, Notification, UserSummary};

/// Events sent FROM server TO client over the WebSocket gateway.
///
/// Wire shape: `{"type": "new_message", "data": {...}}` with camelCase fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Handshake accepted, session is live
    Ready {
        user_id: Uuid,
        session_id: Uuid,
        online_users: Vec<Uuid>,
    },

    /// Stored, receiver was offline
    MessageSent {
        message: Message,
        correlation_id: Option<String>,
    },

    /// Receiver has the message (on send: receiver was online)
    MessageDelivered {
        message_id: Uuid,
        correlation_id: Option<String>,
    },

    /// A single message was read by its receiver
    MessageRead { message_ids: Vec<Uuid>, read_by: Uuid },

    /// A whole conversation was marked read in one batch
    MessagesRead { message_ids: Vec<Uuid>, read_by: Uuid },

    NewMessage { message: Message, sender: UserSummary },

    MessageDeleted { message_id: Uuid },

    UserOnline { user_id: Uuid },

    UserOffline { user_id: Uuid },

    UserTyping { user_id: Uuid },

    UserStopTyping { user_id: Uuid },

    /// A durable notification row was created for this user
    Notification { notification: Notification },

    /// An inbound command failed; sent only to the originating session
    Error {
        kind: ErrorKind,
        message: String,
        correlation_id: Option<String>,
    },
}

impl GatewayEvent {
    pub fn from_error(err: &ChatError, correlation_id: Option<String>) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.message().to_string(),
            correlation_id,
        }
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessageRead { .. } => "message_read",
            Self::MessagesRead { .. } => "messages_read",
            Self::NewMessage { .. } => "new_message",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::Notification { .. } => "notification",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    SendMessage {
        receiver_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        correlation_id: Option<String>,
    },

    /// Receiver acknowledges the message reached a device
    MessageDelivered { message_id: Uuid },

    /// Receiver has seen the message
    MessageRead { message_id: Uuid },

    Typing { receiver_id: Uuid },

    StopTyping { receiver_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_parses_with_optional_fields_missing() {
        let receiver = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"send_message","data":{{"receiverId":"{receiver}","content":"hi"}}}}"#
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            cmd,
            GatewayCommand::SendMessage {
                receiver_id: receiver,
                content: "hi".into(),
                media_url: None,
                media_type: None,
                correlation_id: None,
            }
        );
    }

    #[test]
    fn stop_typing_uses_snake_case_tag() {
        let receiver = Uuid::new_v4();
        let raw = format!(r#"{{"type":"stop_typing","data":{{"receiverId":"{receiver}"}}}}"#);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::StopTyping { receiver_id: receiver });
    }

    #[test]
    fn delivered_event_wire_shape() {
        let id = Uuid::new_v4();
        let event = GatewayEvent::MessageDelivered {
            message_id: id,
            correlation_id: Some("t1".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_delivered");
        assert_eq!(json["data"]["messageId"], id.to_string());
        assert_eq!(json["data"]["correlationId"], "t1");
        assert_eq!(event.name(), "message_delivered");
    }

    #[test]
    fn error_event_carries_kind() {
        let err = ChatError::NotFound("message not found".into());
        let json = serde_json::to_value(GatewayEvent::from_error(&err, None)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["kind"], "not_found");
        assert_eq!(json["data"]["message"], "message not found");
    }
}
