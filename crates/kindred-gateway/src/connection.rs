use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use kindred_types::ChatError;
use kindred_types::events::{GatewayCommand, GatewayEvent};

use crate::auth::AuthIdentity;
use crate::gateway::ConnectionGateway;

/// Commands a session may have queued before it is told to back off.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Drive a pre-authenticated WebSocket connection until it closes.
///
/// The credential was already checked at the HTTP upgrade layer, so a
/// rejected client never reaches this point and never gets a session.
pub async fn handle_connection(socket: WebSocket, gateway: ConnectionGateway, identity: AuthIdentity) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = identity.user_id;

    let (session, mut session_rx) = gateway.open_session(user_id);
    info!(
        "{} ({}) connected to gateway, session {}",
        identity.email, user_id, session.id
    );

    let heartbeat_interval = gateway.config().heartbeat_interval;
    let max_missed = gateway.config().max_missed_heartbeats;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= max_missed {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Commands run in arrival order on a worker that outlives the socket.
    // The reader only queues them, so pongs are seen while a command runs.
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<GatewayCommand>(COMMAND_QUEUE_CAPACITY);
    let worker_gateway = gateway.clone();
    let worker_session = session.clone();
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            for reply in worker_gateway.handle_command(&worker_session, cmd).await {
                worker_session.reply(reply);
            }
        }
    });

    // Read commands from client
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let cmd = match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                        Ok(cmd) => cmd,
                        Err(e) => {
                            warn!(
                                "{} bad command: {} -- raw: {}",
                                user_id,
                                e,
                                text.as_str().chars().take(200).collect::<String>()
                            );
                            continue;
                        }
                    };

                    match cmd_tx.try_send(cmd) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("{} command queue full, rejecting command", user_id);
                            let err = ChatError::InvalidState("too many commands in flight".into());
                            recv_session.reply(GatewayEvent::from_error(&err, None));
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.close_session(&session);
    info!("{} ({}) disconnected from gateway", identity.email, user_id);
}
