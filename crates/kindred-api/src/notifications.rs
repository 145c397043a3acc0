use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use kindred_types::api::UnreadCountResponse;

use crate::error::{ApiError, ApiResult};
use crate::messages::PageQuery;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// GET /notifications — newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    WithRejection(Query(page), _): WithRejection<Query<PageQuery>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let notifications = state
        .notifications
        .list(user.user_id, page.clamped_limit(), page.offset)
        .await?;
    Ok(Json(notifications))
}

/// GET /notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let count = state.notifications.unread_count(user.user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// POST /notifications/{notification_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    WithRejection(Path(notification_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    state
        .notifications
        .mark_read(notification_id, user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
