//! Participant handlers.
//!
//! - `GET /api/v1/rooms/{id}/participants` - participants, optionally by status
//! - `GET /api/v1/rooms/{id}/participants/waiting` - waiting room (host only)
//! - `POST /api/v1/rooms/{id}/participants/{pid}/admit|deny|block|remove`
//!   - host moderation; all but admit accept an optional `{"reason": ...}`

use crate::errors::RoomError;
use crate::handlers::{observe, parse_optional_json};
use crate::models::{AccessGrant, Caller, Participant, ParticipantStatus, ReasonRequest, StatusResponse};
use crate::routes::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Extension, Json,
};
use common::types::{ParticipantId, RoomId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Default, Deserialize)]
pub struct ParticipantsQuery {
    #[serde(default)]
    pub status: Option<ParticipantStatus>,
}

/// Handler for GET /api/v1/rooms/{id}/participants
#[instrument(skip_all, name = "room.handlers.list_participants", fields(room_id = %room_id))]
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    query: Result<Query<ParticipantsQuery>, QueryRejection>,
) -> Result<Json<Vec<Participant>>, RoomError> {
    let Query(query) = observe(
        "list_participants",
        query.map_err(|e| RoomError::BadRequest(format!("Invalid query: {e}"))),
    )?;
    let participants = observe(
        "list_participants",
        state
            .coordinator
            .list_participants(room_id, query.status)
            .await,
    )?;
    Ok(Json(participants))
}

/// Handler for GET /api/v1/rooms/{id}/participants/waiting
#[instrument(skip_all, name = "room.handlers.list_waiting", fields(room_id = %room_id))]
pub async fn list_waiting_participants(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<Participant>>, RoomError> {
    let waiting = observe(
        "list_waiting_participants",
        state
            .coordinator
            .list_waiting_participants(room_id, caller.user_id)
            .await,
    )?;
    Ok(Json(waiting))
}

/// Handler for POST /api/v1/rooms/{id}/participants/{pid}/admit
///
/// Returns the admitted participant's access grant for the host to relay.
#[instrument(
    skip_all,
    name = "room.handlers.admit_participant",
    fields(room_id = %room_id, participant_id = %participant_id)
)]
pub async fn admit_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((room_id, participant_id)): Path<(RoomId, ParticipantId)>,
) -> Result<Json<AccessGrant>, RoomError> {
    let grant = observe(
        "admit_participant",
        state
            .coordinator
            .admit_participant(room_id, caller.user_id, participant_id)
            .await,
    )?;
    Ok(Json(grant))
}

/// Handler for POST /api/v1/rooms/{id}/participants/{pid}/deny
#[instrument(
    skip_all,
    name = "room.handlers.deny_participant",
    fields(room_id = %room_id, participant_id = %participant_id)
)]
pub async fn deny_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((room_id, participant_id)): Path<(RoomId, ParticipantId)>,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, RoomError> {
    let request: ReasonRequest = observe("deny_participant", parse_optional_json(&body))?;
    observe(
        "deny_participant",
        state
            .coordinator
            .deny_participant(room_id, caller.user_id, participant_id, request.reason)
            .await,
    )?;
    Ok(Json(StatusResponse::ok()))
}

/// Handler for POST /api/v1/rooms/{id}/participants/{pid}/block
#[instrument(
    skip_all,
    name = "room.handlers.block_participant",
    fields(room_id = %room_id, participant_id = %participant_id)
)]
pub async fn block_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((room_id, participant_id)): Path<(RoomId, ParticipantId)>,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, RoomError> {
    let request: ReasonRequest = observe("block_participant", parse_optional_json(&body))?;
    observe(
        "block_participant",
        state
            .coordinator
            .block_participant(room_id, caller.user_id, participant_id, request.reason)
            .await,
    )?;
    Ok(Json(StatusResponse::ok()))
}

/// Handler for POST /api/v1/rooms/{id}/participants/{pid}/remove
#[instrument(
    skip_all,
    name = "room.handlers.remove_participant",
    fields(room_id = %room_id, participant_id = %participant_id)
)]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((room_id, participant_id)): Path<(RoomId, ParticipantId)>,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, RoomError> {
    let request: ReasonRequest = observe("remove_participant", parse_optional_json(&body))?;
    observe(
        "remove_participant",
        state
            .coordinator
            .remove_participant(room_id, caller.user_id, participant_id, request.reason)
            .await,
    )?;
    Ok(Json(StatusResponse::ok()))
}
