use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use tracing::debug;

use lobby_gateway::auth::verify_token;
use lobby_types::ChatError;

use crate::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer token, then expose the caller's
/// `Identity` to handlers as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(|| {
        debug!("Rejected {} {}: no bearer token", req.method(), req.uri().path());
        ChatError::AuthenticationFailed
    })?;

    let identity = verify_token(&state.jwt_secret, bearer.token())?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
