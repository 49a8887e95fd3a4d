//! HTTP request handlers for the room service.
//!
//! Request bodies are deserialized by hand so malformed JSON maps to a 400
//! with the service's error envelope rather than axum's default 422.

pub mod health;
pub mod invitations;
pub mod metrics;
pub mod participants;
pub mod rooms;
pub mod webhooks;

pub use health::{health_check, readiness_check};
pub use invitations::{
    accept_invitation, decline_invitation, invite_by_email, list_my_invitations,
    list_room_invitations,
};
pub use metrics::metrics_handler;
pub use participants::{
    admit_participant, block_participant, deny_participant, list_participants,
    list_waiting_participants, remove_participant,
};
pub use rooms::{
    cancel_room, create_room, end_room, get_room, issue_access_token, join_room, leave_room,
    list_rooms, start_room, transfer_host,
};
pub use webhooks::receive_media_webhook;

use crate::errors::RoomError;
use serde::de::DeserializeOwned;

/// Deserialize a required JSON body.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, RoomError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "room.handlers", error = %e, "Invalid request body");
        RoomError::BadRequest("Invalid request body".to_string())
    })
}

/// Deserialize an optional JSON body; an empty body yields the default.
pub(crate) fn parse_optional_json<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, RoomError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

/// Count a failed operation in `room_errors_total`.
pub(crate) fn observe<T>(operation: &'static str, result: Result<T, RoomError>) -> Result<T, RoomError> {
    result.inspect_err(|e| {
        crate::observability::metrics::record_error(operation, e.code(), e.status_code());
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::ReasonRequest;

    #[test]
    fn test_optional_body_defaults_when_empty() {
        let parsed: ReasonRequest = parse_optional_json(b"").unwrap();
        assert!(parsed.reason.is_none());

        let parsed: ReasonRequest = parse_optional_json(b"  \n").unwrap();
        assert!(parsed.reason.is_none());

        let parsed: ReasonRequest = parse_optional_json(br#"{"reason":"spam"}"#).unwrap();
        assert_eq!(parsed.reason.as_deref(), Some("spam"));
    }

    #[test]
    fn test_malformed_body_is_bad_request() {
        let result: Result<ReasonRequest, _> = parse_json(b"{");
        assert!(matches!(result, Err(RoomError::BadRequest(_))));
    }
}
