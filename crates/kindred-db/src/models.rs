/// Database row types — these map directly to SQLite rows.
/// Distinct from kindred-types models to keep the DB layer independent;
/// the `into_*` conversions are the only place the two meet.
use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use kindred_types::models::{Message, MessageStatus, Notification, UserProfile};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub is_suspended: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub status: i64,
    pub created_at: String,
}

pub struct ConversationRow {
    pub counterpart_id: String,
    pub counterpart_username: String,
    pub last_message: MessageRow,
    pub unread_count: i64,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub actor_id: Option<String>,
    pub kind: String,
    pub payload: String,
    pub is_read: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: parse_uuid(&self.id, "user id")?,
            username: self.username,
            is_suspended: self.is_suspended,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let status = MessageStatus::from_ordinal(self.status)
            .ok_or_else(|| anyhow!("Corrupt status {} on message '{}'", self.status, self.id))?;

        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            sender_id: parse_uuid(&self.sender_id, "sender_id")?,
            receiver_id: parse_uuid(&self.receiver_id, "receiver_id")?,
            content: self.content,
            media_url: self.media_url,
            media_type: self.media_type,
            status,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl NotificationRow {
    pub fn into_notification(self) -> Result<Notification> {
        let actor_id = match self.actor_id.as_deref() {
            Some(raw) => Some(parse_uuid(raw, "actor_id")?),
            None => None,
        };

        Ok(Notification {
            id: parse_uuid(&self.id, "notification id")?,
            user_id: parse_uuid(&self.user_id, "user_id")?,
            actor_id,
            kind: self.kind,
            payload: serde_json::from_str(&self.payload)?,
            is_read: self.is_read,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Timestamps are written with a fixed width so text ordering in SQL
/// matches chronological ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone. Parse as naive UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("Corrupt {} '{}': {}", what, raw, e))
}
