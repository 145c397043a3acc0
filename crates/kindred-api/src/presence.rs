use axum::{
    Json,
    extract::{Path, State},
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use kindred_types::api::{OnlineUsersResponse, PresenceResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /presence
pub async fn list_online(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        user_ids: state.presence.list_online(),
    })
}

/// GET /presence/{user_id}
pub async fn user_presence(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        user_id,
        online: state.presence.is_online(user_id),
    })
}
