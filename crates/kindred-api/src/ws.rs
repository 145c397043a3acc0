use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_extra::extract::WithRejection;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tracing::warn;

use kindred_gateway::connection;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway — authenticate, then upgrade. Browsers cannot set headers
/// on WebSocket requests, so `?token=` is accepted as well.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<GatewayQuery>, ApiError>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let token = bearer
        .as_ref()
        .map(|TypedHeader(auth)| auth.token())
        .or(query.token.as_deref());

    let identity = state.gateway.authenticate(token).await.inspect_err(|e| {
        warn!("Gateway handshake rejected: {}", e);
    })?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, identity)))
}
