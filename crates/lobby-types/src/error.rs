use thiserror::Error;

/// Failures returned to the connection or request that caused them.
/// None of these are ever broadcast to a room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid request: {0}")]
    ValidationFailed(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Message not found")]
    NotFound,

    #[error("Only the author may change this message")]
    Forbidden,

    #[error("Operation timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Stable machine-readable code carried in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Timeout => "timeout",
            Self::Storage(_) => "storage",
        }
    }

    /// Text safe to show a client. Storage details stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
