//! HTTP surface of the messaging core: pull-style REST routes for clients
//! that are not connected, plus the `/gateway` WebSocket upgrade.

pub mod blocks;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod presence;
pub mod state;
pub mod ws;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::{AppState, AppStateInner};

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/gateway", get(ws::ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/conversations", get(messages::list_conversations))
        .route("/conversations/{user_id}", get(messages::get_conversation))
        .route("/conversations/{user_id}/messages", post(messages::send_message))
        .route("/conversations/{user_id}/read", post(messages::mark_conversation_read))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/{message_id}/status", patch(messages::update_status))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/presence", get(presence::list_online))
        .route("/presence/{user_id}", get(presence::user_presence))
        .route(
            "/users/{user_id}/block",
            post(blocks::block_user).delete(blocks::unblock_user),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use futures_util::{SinkExt, StreamExt};
    use http_body_util::BodyExt;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tokio_tungstenite::tungstenite;
    use tower::ServiceExt;
    use uuid::Uuid;

    use kindred_db::Database;
    use kindred_gateway::{GatewayConfig, JwtVerifier};
    use kindred_types::api::Claims;

    use super::*;

    const SECRET: &str = "test-secret";

    struct TestApp {
        state: AppState,
        app: Router,
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_gateway_config(GatewayConfig::default())
        }

        fn with_gateway_config(config: GatewayConfig) -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let state: AppState = Arc::new(AppStateInner::new(
                db,
                Arc::new(JwtVerifier::new(SECRET)),
                config,
                5000,
            ));
            let app = router(state.clone());
            Self { state, app }
        }

        fn user(&self, name: &str) -> (Uuid, String) {
            let id = Uuid::new_v4();
            self.state.db.create_user(&id.to_string(), name).unwrap();
            (id, token(id))
        }

        async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let req = match body {
                Some(body) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, json)
        }
    }

    fn token(user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id,
            email: format!("{user_id}@example.com"),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let t = TestApp::new();
        let (status, _) = t.call("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_rejected() {
        let t = TestApp::new();
        let (status, body) = t.call("GET", "/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "unauthorized");

        let (status, _) = t.call("GET", "/conversations", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Valid token for an account that does not exist.
        let (status, body) = t.call("GET", "/conversations", Some(&token(Uuid::new_v4())), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn malformed_requests_get_the_error_body() {
        let t = TestApp::new();
        let (_, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");
        let (_, body) = t
            .call("POST", &format!("/conversations/{b}/messages"), Some(&a_token), Some(json!({ "content": "hi" })))
            .await;
        let status_uri = format!("/messages/{}/status", body["message"]["id"].as_str().unwrap());

        let (status, body) = t.call("PATCH", &status_uri, Some(&b_token), Some(json!({ "status": "seen" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");
        assert!(!body["error"]["message"].as_str().unwrap().is_empty());

        let (status, body) = t.call("DELETE", "/messages/not-a-uuid", Some(&a_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");

        let (status, body) = t
            .call(
                "POST",
                &format!("/conversations/{b}/messages"),
                Some(&a_token),
                Some(json!({ "receiverId": b, "content": "hi" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");

        let (status, body) = t.call("GET", &format!("/conversations/{b}?limit=lots"), Some(&a_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");

        let (status, body) = t.call("POST", "/users/nobody/block", Some(&a_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn pull_flow_for_offline_users() {
        let t = TestApp::new();
        let (a, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");

        let (status, body) = t
            .call(
                "POST",
                &format!("/conversations/{b}/messages"),
                Some(&a_token),
                Some(json!({ "content": "hi", "correlationId": "t1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"]["status"], "SENT");
        assert_eq!(body["correlationId"], "t1");
        let message_id = body["message"]["id"].as_str().unwrap().to_string();

        let (_, body) = t.call("GET", "/messages/unread-count", Some(&b_token), None).await;
        assert_eq!(body["count"], 1);

        let (_, body) = t.call("GET", "/conversations", Some(&b_token), None).await;
        assert_eq!(body[0]["counterpart"]["username"], "alice");
        assert_eq!(body[0]["unreadCount"], 1);

        let (_, body) = t.call("GET", &format!("/conversations/{a}?limit=10"), Some(&b_token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["content"], "hi");

        let (status, body) = t.call("POST", &format!("/conversations/{a}/read"), Some(&b_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messageIds"], json!([message_id]));

        let (_, body) = t.call("POST", &format!("/conversations/{a}/read"), Some(&b_token), None).await;
        assert_eq!(body["messageIds"], json!([]));

        let (_, body) = t.call("GET", "/messages/unread-count", Some(&b_token), None).await;
        assert_eq!(body["count"], 0);

        // The offline receiver also got a durable notification.
        let (_, body) = t.call("GET", "/notifications/unread-count", Some(&b_token), None).await;
        assert_eq!(body["count"], 1);
        let (_, body) = t.call("GET", "/notifications", Some(&b_token), None).await;
        let notification_id = body[0]["id"].as_str().unwrap().to_string();
        assert_eq!(body[0]["type"], "new_message");
        let (status, _) = t
            .call("POST", &format!("/notifications/{notification_id}/read"), Some(&a_token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = t
            .call("POST", &format!("/notifications/{notification_id}/read"), Some(&b_token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn status_updates_are_receiver_only_and_monotonic() {
        let t = TestApp::new();
        let (_, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");
        let (_, body) = t
            .call("POST", &format!("/conversations/{b}/messages"), Some(&a_token), Some(json!({ "content": "hi" })))
            .await;
        let uri = format!("/messages/{}/status", body["message"]["id"].as_str().unwrap());

        let (status, _) = t.call("PATCH", &uri, Some(&a_token), Some(json!({ "status": "READ" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = t.call("PATCH", &uri, Some(&b_token), Some(json!({ "status": "READ" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "READ");

        let (status, body) = t.call("PATCH", &uri, Some(&b_token), Some(json!({ "status": "DELIVERED" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "READ");
    }

    #[tokio::test]
    async fn delete_twice_is_not_found() {
        let t = TestApp::new();
        let (_, a_token) = t.user("alice");
        let (b, _) = t.user("bob");
        let (_, body) = t
            .call("POST", &format!("/conversations/{b}/messages"), Some(&a_token), Some(json!({ "content": "oops" })))
            .await;
        let uri = format!("/messages/{}", body["message"]["id"].as_str().unwrap());

        let (status, _) = t.call("DELETE", &uri, Some(&a_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = t.call("DELETE", &uri, Some(&a_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn block_stops_future_sends() {
        let t = TestApp::new();
        let (a, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");

        let (status, _) = t.call("POST", &format!("/users/{a}/block"), Some(&a_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = t.call("POST", &format!("/users/{}/block", Uuid::new_v4()), Some(&a_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = t.call("POST", &format!("/users/{a}/block"), Some(&b_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = t
            .call("POST", &format!("/conversations/{b}/messages"), Some(&a_token), Some(json!({ "content": "hi" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["kind"], "forbidden");

        let (_, body) = t.call("GET", &format!("/conversations/{b}"), Some(&a_token), None).await;
        assert_eq!(body, json!([]));

        let (status, _) = t.call("DELETE", &format!("/users/{a}/block"), Some(&b_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = t
            .call("POST", &format!("/conversations/{b}/messages"), Some(&a_token), Some(json!({ "content": "hi" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // -- WebSocket end to end --

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn serve(app: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(addr: std::net::SocketAddr, token: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/gateway?token={token}"))
            .await
            .unwrap();
        ws
    }

    /// Read frames until one of type `kind` arrives, skipping others.
    async fn next_of(ws: &mut Client, kind: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frame = ws.next().await.unwrap().unwrap();
                if let tungstenite::Message::Text(text) = frame {
                    let event: Value = serde_json::from_str(text.as_str()).unwrap();
                    if event["type"] == kind {
                        return event["data"].clone();
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
    }

    async fn send(ws: &mut Client, command: Value) {
        ws.send(tungstenite::Message::Text(command.to_string().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn websocket_send_read_and_presence() {
        let t = TestApp::new();
        let (a, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");
        let addr = serve(t.app.clone()).await;

        let mut a_ws = connect(addr, &a_token).await;
        let ready = next_of(&mut a_ws, "ready").await;
        assert_eq!(ready["userId"], a.to_string());

        let mut b_ws = connect(addr, &b_token).await;
        next_of(&mut b_ws, "ready").await;
        let online = next_of(&mut a_ws, "user_online").await;
        assert_eq!(online["userId"], b.to_string());

        send(
            &mut a_ws,
            json!({ "type": "send_message", "data": { "receiverId": b, "content": "hi", "correlationId": "t1" } }),
        )
        .await;

        let delivered = next_of(&mut a_ws, "message_delivered").await;
        assert_eq!(delivered["correlationId"], "t1");
        let new_message = next_of(&mut b_ws, "new_message").await;
        assert_eq!(new_message["message"]["status"], "DELIVERED");
        assert_eq!(new_message["sender"]["username"], "alice");
        assert_eq!(new_message["message"]["id"], delivered["messageId"]);

        send(
            &mut b_ws,
            json!({ "type": "message_read", "data": { "messageId": delivered["messageId"] } }),
        )
        .await;
        let read = next_of(&mut a_ws, "message_read").await;
        assert_eq!(read["readBy"], b.to_string());

        b_ws.close(None).await.unwrap();
        let offline = next_of(&mut a_ws, "user_offline").await;
        assert_eq!(offline["userId"], b.to_string());
        assert!(!t.state.presence.is_online(b));
    }

    #[tokio::test]
    async fn websocket_handshake_rejects_bad_token() {
        let t = TestApp::new();
        let addr = serve(t.app.clone()).await;

        let result = tokio_tungstenite::connect_async(format!("ws://{addr}/gateway?token=nope")).await;
        match result {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
            other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
        }
        assert!(t.state.presence.list_online().is_empty());
    }

    #[tokio::test]
    async fn missed_heartbeats_tear_down_the_session() {
        let t = TestApp::with_gateway_config(GatewayConfig {
            heartbeat_interval: Duration::from_millis(100),
            max_missed_heartbeats: 2,
        });
        let (a, a_token) = t.user("alice");
        let (b, b_token) = t.user("bob");
        let addr = serve(t.app.clone()).await;

        let mut a_ws = connect(addr, &a_token).await;
        next_of(&mut a_ws, "ready").await;

        // Bob never reads, so his client never answers a ping.
        let _b_ws = connect(addr, &b_token).await;
        next_of(&mut a_ws, "user_online").await;
        assert!(t.state.presence.is_online(b));

        let offline = next_of(&mut a_ws, "user_offline").await;
        assert_eq!(offline["userId"], b.to_string());
        assert!(!t.state.presence.is_online(b));

        // Alice kept answering pings and is still connected.
        assert!(t.state.presence.is_online(a));
    }

    #[tokio::test]
    async fn disconnect_keeps_queued_sends() {
        let t = TestApp::new();
        let (a, a_token) = t.user("alice");
        let (b, _) = t.user("bob");
        let addr = serve(t.app.clone()).await;

        let mut a_ws = connect(addr, &a_token).await;
        next_of(&mut a_ws, "ready").await;
        send(
            &mut a_ws,
            json!({ "type": "send_message", "data": { "receiverId": b, "content": "bye", "correlationId": "t9" } }),
        )
        .await;
        drop(a_ws);

        let stored = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let history = t.state.messages.conversation(a, b, 10, 0).await.unwrap();
                if !history.is_empty() {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("queued send was never persisted");
        assert_eq!(stored[0].content, "bye");
    }
}
