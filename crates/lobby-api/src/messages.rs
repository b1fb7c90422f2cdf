use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use lobby_types::api::{EditMessageRequest, SendMessageRequest};
use lobby_types::models::{Identity, Message};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `timestamp` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// GET /channels/{channel_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    WithRejection(Path(channel_id), _): WithRejection<Path<String>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .router
        .history(&channel_id, query.before, query.limit)
        .await?;
    Ok(Json(messages))
}

/// POST /channels/{channel_id}/messages: fallback for clients without a
/// live connection. Broadcasts `message:new` exactly as the gateway does.
pub async fn send_message(
    State(state): State<AppState>,
    WithRejection(Path(channel_id), _): WithRejection<Path<String>, ApiError>,
    Extension(identity): Extension<Identity>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .router
        .send_message(&identity, &channel_id, &req.content, req.reply_to)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /messages/{message_id}
pub async fn edit_message(
    State(state): State<AppState>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(identity): Extension<Identity>,
    WithRejection(Json(req), _): WithRejection<Json<EditMessageRequest>, ApiError>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .router
        .edit_message(&identity, message_id, &req.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, ApiError> {
    state.router.delete_message(&identity, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
