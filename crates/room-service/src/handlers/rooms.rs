//! Room handlers.
//!
//! - `POST /api/v1/rooms` - create a room, caller becomes host
//! - `GET /api/v1/rooms` - list rooms with filters
//! - `GET /api/v1/rooms/{id}` - room details
//! - `POST /api/v1/rooms/{id}/join` - join, or enter the waiting room
//! - `POST /api/v1/rooms/{id}/leave` - leave
//! - `POST /api/v1/rooms/{id}/start|end|cancel` - host lifecycle actions
//! - `POST /api/v1/rooms/{id}/token` - fresh media credentials
//! - `POST /api/v1/rooms/{id}/transfer-host` - hand over the host role

use crate::errors::RoomError;
use crate::handlers::{observe, parse_json};
use crate::models::{
    AccessGrant, Caller, CreateRoomRequest, JoinRoomResponse, ListRoomsQuery, Room, RoomFilter,
    RoomPage, StatusResponse, TransferHostRequest, DEFAULT_PAGE_SIZE,
};
use crate::routes::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::RoomId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/rooms
///
/// # Response
///
/// - 201 Created: the room
/// - 400 Bad Request: invalid body or validation failure
/// - 503 Service Unavailable: the media server could not allocate the room
#[instrument(skip_all, name = "room.handlers.create_room")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<Room>), RoomError> {
    let request: CreateRoomRequest = observe("create_room", parse_json(&body))?;
    let room = observe(
        "create_room",
        state.coordinator.create_room(&caller, request).await,
    )?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// Handler for GET /api/v1/rooms
#[instrument(skip_all, name = "room.handlers.list_rooms")]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListRoomsQuery>, QueryRejection>,
) -> Result<Json<RoomPage>, RoomError> {
    let Query(query) = observe(
        "list_rooms",
        query.map_err(|e| RoomError::BadRequest(format!("Invalid query: {e}"))),
    )?;
    let page = observe(
        "list_rooms",
        state.coordinator.list_rooms(room_filter(query)).await,
    )?;
    Ok(Json(page))
}

/// Handler for GET /api/v1/rooms/{id}
#[instrument(skip_all, name = "room.handlers.get_room", fields(room_id = %room_id))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, RoomError> {
    let room = observe("get_room", state.coordinator.get_room(room_id).await)?;
    Ok(Json(room))
}

/// Handler for POST /api/v1/rooms/{id}/join
///
/// # Response
///
/// - 200 OK: joined (with `access`) or waiting (without)
/// - 403 Forbidden: not invited, or denied
/// - 409 Conflict: already in the room
/// - 412 Precondition Failed: room full, ended, or outside its window
#[instrument(skip_all, name = "room.handlers.join_room", fields(room_id = %room_id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<JoinRoomResponse>, RoomError> {
    let joined = observe(
        "join_room",
        state.coordinator.join_room(room_id, &caller).await,
    )?;
    Ok(Json(joined))
}

/// Handler for POST /api/v1/rooms/{id}/leave
#[instrument(skip_all, name = "room.handlers.leave_room", fields(room_id = %room_id))]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<StatusResponse>, RoomError> {
    observe(
        "leave_room",
        state.coordinator.leave_room(room_id, caller.user_id).await,
    )?;
    Ok(Json(StatusResponse::ok()))
}

/// Handler for POST /api/v1/rooms/{id}/start
#[instrument(skip_all, name = "room.handlers.start_room", fields(room_id = %room_id))]
pub async fn start_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, RoomError> {
    let room = observe(
        "start_room",
        state.coordinator.start_room(room_id, caller.user_id).await,
    )?;
    Ok(Json(room))
}

/// Handler for POST /api/v1/rooms/{id}/end
#[instrument(skip_all, name = "room.handlers.end_room", fields(room_id = %room_id))]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, RoomError> {
    let room = observe(
        "end_room",
        state.coordinator.end_room(room_id, caller.user_id).await,
    )?;
    Ok(Json(room))
}

/// Handler for POST /api/v1/rooms/{id}/cancel
#[instrument(skip_all, name = "room.handlers.cancel_room", fields(room_id = %room_id))]
pub async fn cancel_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, RoomError> {
    let room = observe(
        "cancel_room",
        state.coordinator.cancel_room(room_id, caller.user_id).await,
    )?;
    Ok(Json(room))
}

/// Handler for POST /api/v1/rooms/{id}/token
///
/// Re-issues credentials to a participant who is already joined, e.g. after
/// the previous token expired.
#[instrument(skip_all, name = "room.handlers.issue_access_token", fields(room_id = %room_id))]
pub async fn issue_access_token(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<AccessGrant>, RoomError> {
    let grant = observe(
        "issue_access_token",
        state
            .coordinator
            .issue_access_token(room_id, caller.user_id)
            .await,
    )?;
    Ok(Json(grant))
}

/// Handler for POST /api/v1/rooms/{id}/transfer-host
#[instrument(skip_all, name = "room.handlers.transfer_host", fields(room_id = %room_id))]
pub async fn transfer_host(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, RoomError> {
    let request: TransferHostRequest = observe("transfer_host", parse_json(&body))?;
    observe(
        "transfer_host",
        state
            .coordinator
            .transfer_host(room_id, caller.user_id, request.new_host_id)
            .await,
    )?;
    Ok(Json(StatusResponse::ok()))
}

fn room_filter(query: ListRoomsQuery) -> RoomFilter {
    let tags = query
        .tags
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    RoomFilter {
        room_type: query.room_type,
        status: query.status,
        search: query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        tags,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{RoomSortField, RoomType, SortOrder};

    #[test]
    fn test_room_filter_defaults() {
        let filter = room_filter(ListRoomsQuery::default());
        assert_eq!(filter, RoomFilter::default());
    }

    #[test]
    fn test_room_filter_splits_tags_and_trims_search() {
        let filter = room_filter(ListRoomsQuery {
            room_type: Some(RoomType::Public),
            search: Some("  standup ".to_string()),
            tags: Some("Eng, ,infra,".to_string()),
            page: Some(3),
            page_size: Some(50),
            sort_by: Some(RoomSortField::Name),
            sort_order: Some(SortOrder::Asc),
            ..Default::default()
        });

        assert_eq!(filter.search.as_deref(), Some("standup"));
        assert_eq!(filter.tags, vec!["eng".to_string(), "infra".to_string()]);
        assert_eq!(filter.page, 3);
        assert_eq!(filter.page_size, 50);
        assert_eq!(filter.offset(), 100);
        assert_eq!(filter.sort_by, RoomSortField::Name);
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let filter = room_filter(ListRoomsQuery {
            search: Some("   ".to_string()),
            ..Default::default()
        });
        assert!(filter.search.is_none());
    }
}
