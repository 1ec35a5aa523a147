use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::call::InvalidTransition;
use parley_shared::types::UserId;
use parley_shared::AuthError;
use parley_store::StoreError;

/// Failure of a primary operation (send, receipt, call transition). Surfaced
/// to the initiator only. Delivery failures are never represented here; they
/// are logged where the fan-out happens.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("user {user} is not a participant of {scope}")]
    NotParticipant { user: UserId, scope: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn not_participant(user: UserId, scope: impl std::fmt::Display) -> Self {
        CoreError::NotParticipant {
            user,
            scope: scope.to_string(),
        }
    }

    /// Stable machine-readable code sent to clients on `user/{id}/errors`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Auth(_) => "AUTH",
            CoreError::NotParticipant { .. } => "NOT_PARTICIPANT",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::InvalidTransition(_) => "INVALID_TRANSITION",
            CoreError::InvalidRequest(_) => "INVALID_REQUEST",
            CoreError::Store(_) => "INTERNAL",
        }
    }

    /// Message safe to show a client. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            CoreError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Map a store `NotFound` to a domain `NotFound` naming the missing thing.
pub(crate) trait StoreResultExt<T> {
    fn or_not_found(self, what: impl FnOnce() -> String) -> Result<T, CoreError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn or_not_found(self, what: impl FnOnce() -> String) -> Result<T, CoreError> {
        self.map_err(|e| match e {
            StoreError::NotFound => CoreError::NotFound(what()),
            other => CoreError::Store(other),
        })
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ServerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Auth(auth) => ServerError::Unauthorized(auth),
            CoreError::NotParticipant { user, scope } => {
                ServerError::Forbidden(format!("user {user} is not a participant of {scope}"))
            }
            CoreError::NotFound(what) => ServerError::NotFound(what),
            CoreError::InvalidTransition(t) => ServerError::Conflict(t.to_string()),
            CoreError::InvalidRequest(msg) => ServerError::BadRequest(msg),
            CoreError::Store(store) => ServerError::Internal(store.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
