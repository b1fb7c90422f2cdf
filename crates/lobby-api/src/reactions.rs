use axum::{
    Extension, Json,
    extract::{Path, State},
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use lobby_types::api::ToggleReactionRequest;
use lobby_types::models::{Identity, Reaction};

use crate::AppState;
use crate::error::ApiError;

/// POST /messages/{message_id}/reactions: toggles the caller's reaction and
/// returns the message's full reaction list.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(identity): Extension<Identity>,
    WithRejection(Json(req), _): WithRejection<Json<ToggleReactionRequest>, ApiError>,
) -> Result<Json<Vec<Reaction>>, ApiError> {
    let reactions = state
        .router
        .toggle_reaction(&identity, message_id, &req.emoji)
        .await?;
    Ok(Json(reactions))
}
