use std::sync::Arc;

use kindred_db::Database;
use kindred_gateway::{
    AuthVerifier, BlockGuard, ConnectionGateway, GatewayConfig, MessageLifecycleManager,
    NotificationFanout, PresenceRegistry,
};

pub type AppState = Arc<AppStateInner>;

/// Everything the handlers need, built once at startup.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub presence: PresenceRegistry,
    pub notifications: NotificationFanout,
    pub messages: MessageLifecycleManager,
    pub gateway: ConnectionGateway,
}

impl AppStateInner {
    /// Wire the messaging core together. Each service receives its
    /// collaborators here, leaf components first.
    pub fn new(
        db: Arc<Database>,
        auth: Arc<dyn AuthVerifier>,
        gateway_config: GatewayConfig,
        max_content_len: usize,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let blocks = BlockGuard::new(db.clone());
        let notifications = NotificationFanout::new(presence.clone(), db.clone());
        let messages = MessageLifecycleManager::new(
            db.clone(),
            db.clone(),
            blocks.clone(),
            presence.clone(),
            notifications.clone(),
        )
        .with_max_content_len(max_content_len);
        let gateway = ConnectionGateway::new(
            auth,
            db.clone(),
            presence.clone(),
            notifications.clone(),
            messages.clone(),
            blocks,
            gateway_config,
        );

        Self {
            db,
            presence,
            notifications,
            messages,
            gateway,
        }
    }
}
