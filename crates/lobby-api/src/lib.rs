//! REST collaborator surface. Every handler goes through the same
//! `ChatRouter` as the gateway, so writes made here are broadcast live.

pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};

use lobby_gateway::ChatRouter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub router: ChatRouter,
    pub jwt_secret: String,
}

/// Authenticated message routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
