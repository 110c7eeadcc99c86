//! Errors - domain failures and their HTTP mapping

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Error returned by HTTP handlers, rendered as `{"error": ..., "details": ...}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: &'static str,
    details: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    // Common error constructors
    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal_server_error(message: &'static str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: &'static str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

/// Failures of the chat core, shared by the HTTP surface and the WebSocket gateway.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("missing, invalid or expired credential")]
    AuthenticationFailed,

    #[error("identity is not a participant of this room")]
    AuthorizationDenied,

    #[error("room not found")]
    RoomNotFound,

    #[error("sender is not a participant of this room")]
    NotParticipant,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("malformed frame: {0}")]
    InvalidFrame(String),

    #[error("one of the users has blocked the other")]
    Blocked,

    #[error("illegal connection transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl ChatError {
    /// Short stable code sent to clients in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::AuthenticationFailed => "authentication_failed",
            ChatError::AuthorizationDenied => "authorization_denied",
            ChatError::RoomNotFound => "room_not_found",
            ChatError::NotParticipant => "not_participant",
            ChatError::NotFound(_) => "not_found",
            ChatError::EmptyContent => "empty_content",
            ChatError::InvalidFrame(_) => "invalid_frame",
            ChatError::Blocked => "blocked",
            ChatError::InvalidTransition { .. } => "invalid_transition",
            ChatError::Persistence(_) => "persistence_failure",
        }
    }

    /// Errors after which a room connection must not keep accepting frames.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            ChatError::AuthenticationFailed
                | ChatError::AuthorizationDenied
                | ChatError::RoomNotFound
                | ChatError::InvalidTransition { .. }
        )
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::AuthenticationFailed => {
                Self::unauthorized("Invalid or expired token")
            }
            ChatError::AuthorizationDenied | ChatError::NotParticipant => {
                Self::forbidden("You are not part of this room")
            }
            ChatError::RoomNotFound => Self::not_found("Room not found"),
            ChatError::NotFound(entity) => {
                Self::not_found("Resource not found").with_details(format!("{entity} not found"))
            }
            ChatError::EmptyContent | ChatError::InvalidFrame(_) => {
                Self::bad_request("Invalid request").with_details(err.to_string())
            }
            ChatError::Blocked => Self::forbidden("One of the users has blocked the other"),
            ChatError::InvalidTransition { .. } => {
                Self::internal_server_error("Internal server error").with_details(err.to_string())
            }
            ChatError::Persistence(e) => Self::from(e),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("Resource not found"),

            sqlx::Error::Database(_) => Self::bad_request("Database error"),

            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::service_unavailable("Database unavailable")
            }

            _ => Self::internal_server_error("Internal server error"),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::bad_request("Validation error").with_details(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorResponse {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_errors_map_to_http_statuses() {
        assert_eq!(
            AppError::from(ChatError::AuthenticationFailed).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(ChatError::AuthorizationDenied).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(ChatError::RoomNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ChatError::NotFound("listing")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ChatError::Persistence(sqlx::Error::PoolTimedOut)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn only_access_errors_close_a_connection() {
        assert!(ChatError::RoomNotFound.is_fatal_for_connection());
        assert!(ChatError::AuthorizationDenied.is_fatal_for_connection());
        assert!(!ChatError::EmptyContent.is_fatal_for_connection());
        assert!(!ChatError::Persistence(sqlx::Error::PoolClosed).is_fatal_for_connection());
    }
}
