use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use uuid::Uuid;

use kindred_gateway::MessageDraft;
use kindred_types::api::{
    MarkReadResponse, SendMessageRequest, SendMessageResponse, UnreadCountResponse,
    UpdateStatusRequest,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::state::AppState;

const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

impl PageQuery {
    pub fn clamped_limit(&self) -> u32 {
        self.limit.min(MAX_PAGE_SIZE)
    }
}

/// GET /conversations — one summary per counterpart, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let summaries = state.messages.conversations(user.user_id).await?;
    Ok(Json(summaries))
}

/// GET /conversations/{user_id} — history with one user, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    WithRejection(Path(other_user_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(page), _): WithRejection<Query<PageQuery>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let messages = state
        .messages
        .conversation(user.user_id, other_user_id, page.clamped_limit(), page.offset)
        .await?;
    Ok(Json(messages))
}

/// POST /conversations/{user_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    WithRejection(Path(receiver_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let draft = MessageDraft {
        receiver_id,
        content: req.content,
        media_url: req.media_url,
        media_type: req.media_type,
    };
    let outcome = state
        .messages
        .send_message(user.user_id, draft, req.correlation_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: outcome.message,
            correlation_id: outcome.correlation_id,
        }),
    ))
}

/// POST /conversations/{user_id}/read
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    WithRejection(Path(other_user_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let message_ids = state
        .messages
        .mark_conversation_as_read(user.user_id, other_user_id)
        .await?;
    Ok(Json(MarkReadResponse { message_ids }))
}

/// GET /messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let count = state.messages.unread_count(user.user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// PATCH /messages/{message_id}/status — never downgrades; returns the stored record.
pub async fn update_status(
    State(state): State<AppState>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateStatusRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .messages
        .update_status(message_id, req.status, user.user_id)
        .await?;
    Ok(Json(message))
}

/// DELETE /messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    state.messages.delete_message(message_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
