use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use kindred_gateway::store::blocking;
use kindred_types::ChatError;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// POST /users/{user_id}/block — idempotent. Existing messages and open
/// sessions are left alone; the block applies to future sends.
pub async fn block_user(
    State(state): State<AppState>,
    WithRejection(Path(target_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    if target_id == user.user_id {
        return Err(ChatError::InvalidInput("cannot block yourself".into()).into());
    }

    let db = state.db.clone();
    let (blocker, blocked) = (user.user_id.to_string(), target_id.to_string());
    let created = blocking(move || {
        if db.get_user_by_id(&blocked)?.is_none() {
            return Ok(None);
        }
        db.insert_block(&blocker, &blocked).map(Some)
    })
    .await?
    .ok_or_else(|| ChatError::NotFound("user not found".into()))?;

    if created {
        info!("{} blocked {}", user.user_id, target_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/{user_id}/block — idempotent.
pub async fn unblock_user(
    State(state): State<AppState>,
    WithRejection(Path(target_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let (blocker, blocked) = (user.user_id.to_string(), target_id.to_string());
    if blocking(move || db.delete_block(&blocker, &blocked)).await? {
        info!("{} unblocked {}", user.user_id, target_id);
    }
    Ok(StatusCode::NO_CONTENT)
}
