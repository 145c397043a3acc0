use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use uuid::Uuid;

use kindred_types::events::GatewayEvent;

pub type SessionId = Uuid;

/// Push half of one live connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl SessionHandle {
    pub fn new(id: SessionId) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue an event for the connection's write loop. Returns false if the
    /// connection is already gone.
    pub fn push(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The user had no sessions before; they are now online.
    CameOnline,
    /// Another session for an already-online user.
    AddedSession,
    /// This session id was already registered. Nothing changed.
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// That was the last session; the user is now offline.
    WentOffline,
    /// Other sessions remain.
    RemovedSession,
    /// Unknown user or session. Nothing changed.
    NotRegistered,
}

/// Live sessions per user.
///
/// Each user key lives in its own dashmap shard slot, so register/unregister
/// for different users never contend on one lock. A user key is present iff
/// it has at least one session: the key is removed under the same entry lock
/// that removes the last session.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    users: Arc<DashMap<Uuid, HashMap<SessionId, SessionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: Uuid, session: SessionHandle) -> RegisterOutcome {
        match self.users.entry(user_id) {
            Entry::Vacant(vacant) => {
                vacant.insert(HashMap::from([(session.id, session)]));
                RegisterOutcome::CameOnline
            }
            Entry::Occupied(mut occupied) => {
                let sessions = occupied.get_mut();
                if sessions.contains_key(&session.id) {
                    return RegisterOutcome::AlreadyRegistered;
                }
                sessions.insert(session.id, session);
                RegisterOutcome::AddedSession
            }
        }
    }

    pub fn unregister(&self, user_id: Uuid, session_id: SessionId) -> UnregisterOutcome {
        let Entry::Occupied(mut occupied) = self.users.entry(user_id) else {
            return UnregisterOutcome::NotRegistered;
        };

        if occupied.get_mut().remove(&session_id).is_none() {
            return UnregisterOutcome::NotRegistered;
        }

        if occupied.get().is_empty() {
            occupied.remove();
            UnregisterOutcome::WentOffline
        } else {
            UnregisterOutcome::RemovedSession
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Snapshot of currently online user ids.
    pub fn list_online(&self) -> Vec<Uuid> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of a user's live sessions. Empty when offline.
    pub fn sessions(&self, user_id: Uuid) -> Vec<SessionHandle> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map_or(0, |sessions| sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_register_is_noop() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (session, _rx) = SessionHandle::new(Uuid::new_v4());

        assert_eq!(presence.register(user, session.clone()), RegisterOutcome::CameOnline);
        assert_eq!(presence.register(user, session), RegisterOutcome::AlreadyRegistered);
        assert_eq!(presence.session_count(user), 1);
    }

    #[test]
    fn online_until_last_session_closes() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (phone, _rx1) = SessionHandle::new(Uuid::new_v4());
        let (laptop, _rx2) = SessionHandle::new(Uuid::new_v4());

        assert!(!presence.is_online(user));
        presence.register(user, phone.clone());
        assert_eq!(presence.register(user, laptop.clone()), RegisterOutcome::AddedSession);
        assert!(presence.is_online(user));

        assert_eq!(presence.unregister(user, phone.id()), UnregisterOutcome::RemovedSession);
        assert!(presence.is_online(user));
        assert_eq!(presence.unregister(user, laptop.id()), UnregisterOutcome::WentOffline);
        assert!(!presence.is_online(user));
        assert!(presence.list_online().is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (session, _rx) = SessionHandle::new(Uuid::new_v4());
        presence.register(user, session);

        assert_eq!(presence.unregister(user, Uuid::new_v4()), UnregisterOutcome::NotRegistered);
        assert_eq!(
            presence.unregister(Uuid::new_v4(), Uuid::new_v4()),
            UnregisterOutcome::NotRegistered
        );
        assert!(presence.is_online(user));
    }

    #[test]
    fn list_online_snapshots_users() {
        let presence = PresenceRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (s1, _rx1) = SessionHandle::new(Uuid::new_v4());
        let (s2, _rx2) = SessionHandle::new(Uuid::new_v4());
        presence.register(a, s1);
        presence.register(b, s2);

        let mut online = presence.list_online();
        online.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(online, expected);
    }

    #[test]
    fn push_fails_once_receiver_dropped() {
        let (session, rx) = SessionHandle::new(Uuid::new_v4());
        let event = GatewayEvent::UserOnline { user_id: Uuid::new_v4() };
        assert!(session.push(event.clone()));
        drop(rx);
        assert!(!session.push(event));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_leaves_consistent_state() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let presence = presence.clone();
            tasks.push(tokio::spawn(async move {
                let (session, _rx) = SessionHandle::new(Uuid::new_v4());
                let id = session.id();
                presence.register(user, session);
                tokio::task::yield_now().await;
                presence.unregister(user, id)
            }));
        }

        let mut went_offline = 0;
        for task in tasks {
            if task.await.unwrap() == UnregisterOutcome::WentOffline {
                went_offline += 1;
            }
        }

        assert!(went_offline >= 1);
        assert!(!presence.is_online(user));
        assert_eq!(presence.session_count(user), 0);
    }
}
