//! Real-time messaging core: presence, block checks, the message status
//! state machine, best-effort fanout and the WebSocket connection gateway.

pub mod auth;
pub mod block_guard;
pub mod connection;
pub mod fanout;
pub mod gateway;
pub mod lifecycle;
pub mod presence;
pub mod store;

pub use auth::{AuthIdentity, AuthVerifier, JwtVerifier};
pub use block_guard::BlockGuard;
pub use fanout::NotificationFanout;
pub use gateway::{ConnectionGateway, GatewayConfig, Session};
pub use lifecycle::{MessageDraft, MessageLifecycleManager, SendOutcome};
pub use presence::PresenceRegistry;
