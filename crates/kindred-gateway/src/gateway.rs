use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::ChatError;
use kindred_types::events::{GatewayCommand, GatewayEvent};
use kindred_types::models::MessageStatus;

use crate::auth::{AuthIdentity, AuthVerifier};
use crate::block_guard::BlockGuard;
use crate::fanout::NotificationFanout;
use crate::lifecycle::{MessageDraft, MessageLifecycleManager};
use crate::presence::{PresenceRegistry, RegisterOutcome, SessionHandle, SessionId, UnregisterOutcome};
use crate::store::{UserStore, blocking};

/// Heartbeat tuning for live connections.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How often the server pings.
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the connection is dropped.
    pub max_missed_heartbeats: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            max_missed_heartbeats: 2,
        }
    }
}

/// One live, authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    handle: SessionHandle,
}

impl Session {
    /// Queue an event for this connection only.
    pub fn reply(&self, event: GatewayEvent) -> bool {
        self.handle.push(event)
    }
}

/// Front door for live connections: authenticates, tracks presence and
/// routes inbound commands to the lifecycle manager.
#[derive(Clone)]
pub struct ConnectionGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    auth: Arc<dyn AuthVerifier>,
    users: Arc<dyn UserStore>,
    presence: PresenceRegistry,
    fanout: NotificationFanout,
    lifecycle: MessageLifecycleManager,
    blocks: BlockGuard,
    config: GatewayConfig,
}

impl ConnectionGateway {
    pub fn new(
        auth: Arc<dyn AuthVerifier>,
        users: Arc<dyn UserStore>,
        presence: PresenceRegistry,
        fanout: NotificationFanout,
        lifecycle: MessageLifecycleManager,
        blocks: BlockGuard,
        config: GatewayConfig,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                auth,
                users,
                presence,
                fanout,
                lifecycle,
                blocks,
                config,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Check a presented credential and that its user may connect.
    ///
    /// Nothing is registered here; a failure leaves no trace in presence.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<AuthIdentity, ChatError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChatError::Unauthorized("missing credential".into()))?;
        let identity = self.inner.auth.verify(token)?;

        let store = self.inner.users.clone();
        let user_id = identity.user_id;
        let user = blocking(move || store.find_user(user_id))
            .await?
            .ok_or_else(|| ChatError::NotFound("user not found".into()))?;

        if user.is_suspended {
            return Err(ChatError::Forbidden("account is suspended".into()));
        }
        Ok(identity)
    }

    /// Create a session for an authenticated user and mark them present.
    ///
    /// The returned receiver yields everything pushed to this session,
    /// starting with `ready`.
    pub fn open_session(&self, user_id: Uuid) -> (Session, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (handle, rx) = SessionHandle::new(Uuid::new_v4());
        let session = Session {
            id: handle.id(),
            user_id,
            created_at: Utc::now(),
            handle: handle.clone(),
        };

        let online_users = self
            .inner
            .presence
            .list_online()
            .into_iter()
            .filter(|&id| id != user_id)
            .collect();
        session.reply(GatewayEvent::Ready {
            user_id,
            session_id: session.id,
            online_users,
        });

        if self.inner.presence.register(user_id, handle) == RegisterOutcome::CameOnline {
            info!("{} is online", user_id);
            self.inner
                .fanout
                .broadcast_except(user_id, GatewayEvent::UserOnline { user_id });
        }

        (session, rx)
    }

    /// Drop a session from presence; announce offline if it was the last.
    pub fn close_session(&self, session: &Session) {
        let outcome = self.inner.presence.unregister(session.user_id, session.id);
        if outcome == UnregisterOutcome::WentOffline {
            self.announce_offline(session.user_id);
        }
    }

    /// Broadcast `user_offline`, unless a new session registered after the
    /// last one closed and the user is live again.
    fn announce_offline(&self, user_id: Uuid) {
        if self.inner.presence.is_online(user_id) {
            debug!("{} reconnected before going offline, skipping broadcast", user_id);
            return;
        }
        info!("{} is offline", user_id);
        self.inner
            .fanout
            .broadcast_except(user_id, GatewayEvent::UserOffline { user_id });
    }

    /// Handle one inbound command. Pushes to other users happen inside;
    /// the returned events are replies for the calling session only.
    pub async fn handle_command(&self, session: &Session, cmd: GatewayCommand) -> Vec<GatewayEvent> {
        let user_id = session.user_id;

        match cmd {
            GatewayCommand::SendMessage {
                receiver_id,
                content,
                media_url,
                media_type,
                correlation_id,
            } => {
                let draft = MessageDraft {
                    receiver_id,
                    content,
                    media_url,
                    media_type,
                };
                match self
                    .inner
                    .lifecycle
                    .send_message(user_id, draft, correlation_id.clone())
                    .await
                {
                    Ok(outcome) => vec![outcome.ack()],
                    Err(e) => {
                        warn!("{} send_message to {} failed: {}", user_id, receiver_id, e);
                        vec![GatewayEvent::from_error(&e, correlation_id)]
                    }
                }
            }

            GatewayCommand::MessageDelivered { message_id } => {
                self.update_status(user_id, message_id, MessageStatus::Delivered)
                    .await
            }

            GatewayCommand::MessageRead { message_id } => {
                self.update_status(user_id, message_id, MessageStatus::Read)
                    .await
            }

            GatewayCommand::Typing { receiver_id } => {
                self.relay_typing(user_id, receiver_id, GatewayEvent::UserTyping { user_id })
                    .await;
                Vec::new()
            }

            GatewayCommand::StopTyping { receiver_id } => {
                self.relay_typing(user_id, receiver_id, GatewayEvent::UserStopTyping { user_id })
                    .await;
                Vec::new()
            }
        }
    }

    async fn update_status(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Vec<GatewayEvent> {
        match self
            .inner
            .lifecycle
            .update_status(message_id, status, user_id)
            .await
        {
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("{} status {} on {} failed: {}", user_id, status, message_id, e);
                vec![GatewayEvent::from_error(&e, None)]
            }
        }
    }

    /// Typing hints are dropped silently for blocked pairs.
    async fn relay_typing(&self, user_id: Uuid, receiver_id: Uuid, event: GatewayEvent) {
        match self.inner.blocks.is_blocked(user_id, receiver_id).await {
            Ok(false) => {
                self.inner.fanout.emit_to_user(receiver_id, event);
            }
            Ok(true) => debug!("Dropping {} from {} to blocked {}", event.name(), user_id, receiver_id),
            Err(e) => warn!("Block check for typing failed: {}", e),
        }
    }
}
