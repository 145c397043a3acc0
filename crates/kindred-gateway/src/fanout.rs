use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};
use uuid::Uuid;

use kindred_types::ChatError;
use kindred_types::events::GatewayEvent;
use kindred_types::models::Notification;

use crate::presence::PresenceRegistry;
use crate::store::{NotificationStore, blocking};

/// Best-effort push of events to every live session of the target users.
///
/// Pushes are hints: the persisted rows stay the source of truth and a
/// client that missed a push recovers by pulling. Nothing here is retried
/// and no push failure is ever returned to the caller.
#[derive(Clone)]
pub struct NotificationFanout {
    presence: PresenceRegistry,
    notifications: Arc<dyn NotificationStore>,
}

impl NotificationFanout {
    pub fn new(presence: PresenceRegistry, notifications: Arc<dyn NotificationStore>) -> Self {
        Self {
            presence,
            notifications,
        }
    }

    /// Push to every session of one user. Returns how many sessions took it.
    pub fn emit_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let sessions = self.presence.sessions(user_id);
        let delivered = sessions
            .iter()
            .filter(|session| session.push(event.clone()))
            .count();

        trace!(
            "{} -> {} ({}/{} sessions)",
            event.name(),
            user_id,
            delivered,
            sessions.len()
        );
        delivered
    }

    pub fn emit_to_users(&self, user_ids: &[Uuid], event: GatewayEvent) -> usize {
        user_ids
            .iter()
            .map(|&user_id| self.emit_to_user(user_id, event.clone()))
            .sum()
    }

    /// Push to every online user except `origin`.
    pub fn broadcast_except(&self, origin: Uuid, event: GatewayEvent) -> usize {
        let targets: Vec<Uuid> = self
            .presence
            .list_online()
            .into_iter()
            .filter(|&user_id| user_id != origin)
            .collect();
        debug!("Broadcasting {} to {} users", event.name(), targets.len());
        self.emit_to_users(&targets, event)
    }

    /// Persist a notification row, then push it. Only the write can fail.
    pub async fn notify(
        &self,
        user_id: Uuid,
        actor_id: Option<Uuid>,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Notification, ChatError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            actor_id,
            kind: kind.to_string(),
            payload,
            is_read: false,
            created_at: Utc::now(),
        };

        let store = self.notifications.clone();
        let row = notification.clone();
        blocking(move || store.save_notification(&row)).await?;

        self.emit_to_user(
            user_id,
            GatewayEvent::Notification {
                notification: notification.clone(),
            },
        );
        Ok(notification)
    }

    pub async fn list(&self, user_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Notification>, ChatError> {
        let store = self.notifications.clone();
        blocking(move || store.notifications(user_id, limit, offset)).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, ChatError> {
        let store = self.notifications.clone();
        blocking(move || store.unread_notification_count(user_id)).await
    }

    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<(), ChatError> {
        let store = self.notifications.clone();
        let found = blocking(move || store.acknowledge_notification(notification_id, user_id)).await?;
        if !found {
            return Err(ChatError::NotFound("notification not found".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::SessionHandle;
    use kindred_db::Database;

    fn fanout_with_db() -> (NotificationFanout, PresenceRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let presence = PresenceRegistry::new();
        (NotificationFanout::new(presence.clone(), db.clone()), presence, db)
    }

    #[test]
    fn emits_to_every_session_of_user() {
        let (fanout, presence, _db) = fanout_with_db();
        let user = Uuid::new_v4();
        let (phone, mut phone_rx) = SessionHandle::new(Uuid::new_v4());
        let (laptop, mut laptop_rx) = SessionHandle::new(Uuid::new_v4());
        presence.register(user, phone);
        presence.register(user, laptop);

        let event = GatewayEvent::MessageDeleted { message_id: Uuid::new_v4() };
        assert_eq!(fanout.emit_to_user(user, event.clone()), 2);
        assert_eq!(phone_rx.try_recv().unwrap(), event);
        assert_eq!(laptop_rx.try_recv().unwrap(), event);
    }

    #[test]
    fn offline_user_and_dead_session_are_skipped() {
        let (fanout, presence, _db) = fanout_with_db();
        let user = Uuid::new_v4();
        let (alive, mut alive_rx) = SessionHandle::new(Uuid::new_v4());
        let (dead, dead_rx) = SessionHandle::new(Uuid::new_v4());
        presence.register(user, alive);
        presence.register(user, dead);
        drop(dead_rx);

        let event = GatewayEvent::UserTyping { user_id: Uuid::new_v4() };
        assert_eq!(fanout.emit_to_user(user, event.clone()), 1);
        assert!(alive_rx.try_recv().is_ok());
        assert_eq!(fanout.emit_to_user(Uuid::new_v4(), event), 0);
    }

    #[test]
    fn broadcast_skips_origin() {
        let (fanout, presence, _db) = fanout_with_db();
        let origin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (s1, mut origin_rx) = SessionHandle::new(Uuid::new_v4());
        let (s2, mut other_rx) = SessionHandle::new(Uuid::new_v4());
        presence.register(origin, s1);
        presence.register(other, s2);

        fanout.broadcast_except(origin, GatewayEvent::UserOnline { user_id: origin });
        assert!(origin_rx.try_recv().is_err());
        assert_eq!(
            other_rx.try_recv().unwrap(),
            GatewayEvent::UserOnline { user_id: origin }
        );
    }

    #[tokio::test]
    async fn notify_persists_then_pushes() {
        let (fanout, presence, db) = fanout_with_db();
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "alice").unwrap();
        let (session, mut rx) = SessionHandle::new(Uuid::new_v4());
        presence.register(user, session);

        let created = fanout
            .notify(user, None, "new_message", serde_json::json!({ "preview": "hi" }))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            GatewayEvent::Notification { notification } => assert_eq!(notification.id, created.id),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(fanout.unread_count(user).await.unwrap(), 1);

        let listed = fanout.list(user, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].payload["preview"], "hi");

        fanout.mark_read(created.id, user).await.unwrap();
        assert_eq!(fanout.unread_count(user).await.unwrap(), 0);
        assert!(fanout.mark_read(Uuid::new_v4(), user).await.is_err());
    }
}
