//! Invitation handlers.
//!
//! - `POST /api/v1/rooms/{id}/invitations` - invite an email (host only)
//! - `GET /api/v1/rooms/{id}/invitations` - the room's invitations (host only)
//! - `POST /api/v1/rooms/{id}/invitations/accept|decline` - answer an invitation
//! - `GET /api/v1/invitations` - pending invitations for the caller's email

use crate::errors::RoomError;
use crate::handlers::{observe, parse_json};
use crate::models::{Caller, InviteRequest, JoinRoomResponse, Participant};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::RoomId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/rooms/{id}/invitations
#[instrument(skip_all, name = "room.handlers.invite_by_email", fields(room_id = %room_id))]
pub async fn invite_by_email(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<Participant>), RoomError> {
    let request: InviteRequest = observe("invite_by_email", parse_json(&body))?;
    let invitation = observe(
        "invite_by_email",
        state
            .coordinator
            .invite_by_email(room_id, caller.user_id, &request.email)
            .await,
    )?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// Handler for GET /api/v1/rooms/{id}/invitations
#[instrument(skip_all, name = "room.handlers.list_room_invitations", fields(room_id = %room_id))]
pub async fn list_room_invitations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<Participant>>, RoomError> {
    let invitations = observe(
        "list_room_invitations",
        state
            .coordinator
            .list_room_invitations(room_id, caller.user_id)
            .await,
    )?;
    Ok(Json(invitations))
}

/// Handler for POST /api/v1/rooms/{id}/invitations/accept
#[instrument(skip_all, name = "room.handlers.accept_invitation", fields(room_id = %room_id))]
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<JoinRoomResponse>, RoomError> {
    let accepted = observe(
        "accept_invitation",
        state.coordinator.accept_invitation(room_id, &caller).await,
    )?;
    Ok(Json(accepted))
}

/// Handler for POST /api/v1/rooms/{id}/invitations/decline
#[instrument(skip_all, name = "room.handlers.decline_invitation", fields(room_id = %room_id))]
pub async fn decline_invitation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Participant>, RoomError> {
    let declined = observe(
        "decline_invitation",
        state.coordinator.decline_invitation(room_id, &caller).await,
    )?;
    Ok(Json(declined))
}

/// Handler for GET /api/v1/invitations
#[instrument(skip_all, name = "room.handlers.list_my_invitations")]
pub async fn list_my_invitations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<Participant>>, RoomError> {
    let invitations = observe(
        "list_my_invitations",
        state.coordinator.list_my_invitations(&caller).await,
    )?;
    Ok(Json(invitations))
}
