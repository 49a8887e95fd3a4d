//! Room service error types.
//!
//! Every coordinator failure is a `RoomError`. Each variant belongs to one
//! [`ErrorCategory`] and maps to an HTTP status through `IntoResponse`.
//! Database and internal details are logged server-side and replaced with
//! generic messages on the wire.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Coarse error taxonomy shared by all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    PermissionDenied,
    PreconditionFailed,
    BadRequest,
    Unauthenticated,
    Unavailable,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::PreconditionFailed => "precondition_failed",
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::Unauthenticated => "unauthenticated",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Room service error type.
///
/// Maps to HTTP status codes:
/// - NotFound variants: 404
/// - AlreadyInRoom, AlreadyInvited, AlreadyLeft, Conflict: 409
/// - NotHost, AccessDenied, NotInvited, CannotRemoveSelf, CannotTransferToSelf: 403
/// - RoomEnded, RoomFull, TooEarly, JoinWindowClosed, Invalid*Status: 412
/// - BadRequest: 400
/// - InvalidToken, InvalidSignature: 401
/// - MediaUnavailable: 503
/// - Database, Internal: 500
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Participant not found")]
    ParticipantNotFound,

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("Only the host can perform this action")]
    NotHost,

    #[error("You have not been invited to this room")]
    NotInvited,

    #[error("Access to this room has been denied")]
    AccessDenied,

    #[error("Already in room")]
    AlreadyInRoom,

    #[error("Already invited")]
    AlreadyInvited,

    #[error("Already left the room")]
    AlreadyLeft,

    #[error("Room is full")]
    RoomFull,

    #[error("Room has ended")]
    RoomEnded,

    #[error("Room has not opened yet")]
    TooEarly,

    #[error("Room join window has closed")]
    JoinWindowClosed,

    #[error("Invalid participant status: {0}")]
    InvalidParticipantStatus(String),

    #[error("Invalid room status: {0}")]
    InvalidRoomStatus(String),

    #[error("Host cannot remove themselves")]
    CannotRemoveSelf,

    #[error("Cannot transfer host to yourself")]
    CannotTransferToSelf,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Media infrastructure unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error")]
    Internal,
}

impl RoomError {
    /// Category used for metrics labels and webhook acknowledgement decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RoomError::RoomNotFound
            | RoomError::ParticipantNotFound
            | RoomError::InvitationNotFound => ErrorCategory::NotFound,
            RoomError::AlreadyInRoom
            | RoomError::AlreadyInvited
            | RoomError::AlreadyLeft
            | RoomError::Conflict(_) => ErrorCategory::Conflict,
            RoomError::NotHost
            | RoomError::NotInvited
            | RoomError::AccessDenied
            | RoomError::CannotRemoveSelf
            | RoomError::CannotTransferToSelf => ErrorCategory::PermissionDenied,
            RoomError::RoomFull
            | RoomError::RoomEnded
            | RoomError::TooEarly
            | RoomError::JoinWindowClosed
            | RoomError::InvalidParticipantStatus(_)
            | RoomError::InvalidRoomStatus(_) => ErrorCategory::PreconditionFailed,
            RoomError::BadRequest(_) => ErrorCategory::BadRequest,
            RoomError::InvalidToken(_) | RoomError::InvalidSignature => {
                ErrorCategory::Unauthenticated
            }
            RoomError::MediaUnavailable(_) => ErrorCategory::Unavailable,
            RoomError::Database(_) | RoomError::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::PermissionDenied => 403,
            ErrorCategory::PreconditionFailed => 412,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Unauthenticated => 401,
            ErrorCategory::Unavailable => 503,
            ErrorCategory::Internal => 500,
        }
    }

    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomNotFound => "ROOM_NOT_FOUND",
            RoomError::ParticipantNotFound => "PARTICIPANT_NOT_FOUND",
            RoomError::InvitationNotFound => "INVITATION_NOT_FOUND",
            RoomError::NotHost => "NOT_HOST",
            RoomError::NotInvited => "NOT_INVITED",
            RoomError::AccessDenied => "ACCESS_DENIED",
            RoomError::AlreadyInRoom => "ALREADY_IN_ROOM",
            RoomError::AlreadyInvited => "ALREADY_INVITED",
            RoomError::AlreadyLeft => "ALREADY_LEFT",
            RoomError::RoomFull => "ROOM_FULL",
            RoomError::RoomEnded => "ROOM_ENDED",
            RoomError::TooEarly => "TOO_EARLY",
            RoomError::JoinWindowClosed => "JOIN_WINDOW_CLOSED",
            RoomError::InvalidParticipantStatus(_) => "INVALID_PARTICIPANT_STATUS",
            RoomError::InvalidRoomStatus(_) => "INVALID_ROOM_STATUS",
            RoomError::CannotRemoveSelf => "CANNOT_REMOVE_SELF",
            RoomError::CannotTransferToSelf => "CANNOT_TRANSFER_TO_SELF",
            RoomError::BadRequest(_) => "BAD_REQUEST",
            RoomError::InvalidToken(_) => "INVALID_TOKEN",
            RoomError::InvalidSignature => "INVALID_SIGNATURE",
            RoomError::Conflict(_) => "CONFLICT",
            RoomError::MediaUnavailable(_) => "SERVICE_UNAVAILABLE",
            RoomError::Database(_) => "DATABASE_ERROR",
            RoomError::Internal => "INTERNAL_ERROR",
        }
    }

    /// True for failures the webhook sender should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Internal | ErrorCategory::Unavailable
        ) || matches!(self, RoomError::Conflict(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            RoomError::Database(err) => {
                tracing::error!(target: "room.database", error = %err, "Database operation failed");
                "An internal database error occurred".to_string()
            }
            RoomError::MediaUnavailable(reason) => {
                tracing::warn!(target: "room.availability", reason = %reason, "Media infrastructure unavailable");
                "Service temporarily unavailable".to_string()
            }
            RoomError::Internal => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"rooms\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to RoomError
impl From<sqlx::Error> for RoomError {
    fn from(err: sqlx::Error) -> Self {
        RoomError::Database(err.to_string())
    }
}
