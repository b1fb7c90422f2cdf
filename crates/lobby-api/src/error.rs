use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use lobby_types::ChatError;
use lobby_types::api::ErrorBody;

/// HTTP face of a `ChatError`.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

// Malformed bodies, query strings and path ids are validation failures.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ChatError::ValidationFailed(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(ChatError::ValidationFailed(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(ChatError::ValidationFailed(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ChatError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ChatError::UnknownChannel(_) | ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: self.0.public_message(),
            code: self.0.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
