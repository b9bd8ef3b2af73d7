//! Room handlers.
//!
//! - `GET /api/v1/rooms` - List rooms with member counts
//! - `POST /api/v1/rooms` - Create a room hosted by `user_id`
//! - `GET /api/v1/rooms/{room_id}` - Member profiles
//! - `POST /api/v1/rooms/{room_id}/join` - Join and receive a client configuration
//! - `POST /api/v1/rooms/{room_id}/leave` - Leave; the last leave destroys the room
//!
//! Path ids that are not UUIDs cannot name a room and answer 404.

use super::record_status;
use crate::errors::RcError;
use crate::models::{
    CreateRoomResponse, JoinRoomResponse, LeaveRoomResponse, RoomMemberRequest,
    RoomSummaryResponse, UserResponse,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::RoomId;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler for GET /api/v1/rooms
#[instrument(
    skip_all,
    name = "rc.rooms.list",
    fields(
        method = "GET",
        endpoint = "/api/v1/rooms",
        status = tracing::field::Empty,
    )
)]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoomSummaryResponse>>, RcError> {
    let result = state.manager.list_rooms().await;
    record_status(&result);
    Ok(Json(result?.into_iter().map(Into::into).collect()))
}

/// Handler for POST /api/v1/rooms
///
/// # Response
///
/// - 201 Created: room with the host as its only member
/// - 400 Bad Request: malformed body
/// - 404 Not Found: unregistered host
/// - 409 Conflict: host already owns a room (when restricted)
/// - 502 Bad Gateway: network or credential pipeline failed
/// - 503 Service Unavailable: no free slot, or shutting down
#[instrument(
    skip_all,
    name = "rc.rooms.create",
    fields(
        method = "POST",
        endpoint = "/api/v1/rooms",
        status = tracing::field::Empty,
    )
)]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RcError> {
    let result = match parse_member_request(&body) {
        Ok(request) => state.manager.create_room(request.user_id).await,
        Err(e) => Err(e),
    };

    record_status(&result);
    Ok((StatusCode::CREATED, Json(result?.into())))
}

/// Handler for GET /api/v1/rooms/{room_id}
#[instrument(
    skip_all,
    name = "rc.rooms.detail",
    fields(
        method = "GET",
        endpoint = "/api/v1/rooms/{room_id}",
        status = tracing::field::Empty,
    )
)]
pub async fn room_detail(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<UserResponse>>, RcError> {
    let result = match parse_room_id(&room_id) {
        Ok(room_id) => state.manager.room_detail(room_id).await,
        Err(e) => Err(e),
    };

    record_status(&result);
    result.map(Json)
}

/// Handler for POST /api/v1/rooms/{room_id}/join
///
/// # Response
///
/// - 200 OK: updated members and the joiner's client configuration
/// - 404 Not Found: unknown room or user
/// - 409 Conflict: already a member (`ALREADY_MEMBER`)
/// - 500/502: credential pipeline failed; membership is unchanged
#[instrument(
    skip_all,
    name = "rc.rooms.join",
    fields(
        method = "POST",
        endpoint = "/api/v1/rooms/{room_id}/join",
        status = tracing::field::Empty,
    )
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<JoinRoomResponse>, RcError> {
    let result = async {
        let request = parse_member_request(&body)?;
        let room_id = parse_room_id(&room_id)?;
        state.manager.join_room(room_id, request.user_id).await
    }
    .await;

    record_status(&result);
    result.map(|view| Json(view.into()))
}

/// Handler for POST /api/v1/rooms/{room_id}/leave
///
/// # Response
///
/// - 200 OK: remaining members, empty once the room was destroyed
/// - 404 Not Found: unknown room or user
/// - 409 Conflict: not a member (`NOT_A_MEMBER`)
#[instrument(
    skip_all,
    name = "rc.rooms.leave",
    fields(
        method = "POST",
        endpoint = "/api/v1/rooms/{room_id}/leave",
        status = tracing::field::Empty,
    )
)]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<LeaveRoomResponse>, RcError> {
    let result = async {
        let request = parse_member_request(&body)?;
        let room_id = parse_room_id(&room_id)?;
        state.manager.leave_room(room_id, request.user_id).await
    }
    .await;

    record_status(&result);
    result.map(|view| Json(view.into()))
}

/// Deserialize manually to return 400 (not Axum's default 422).
fn parse_member_request(body: &[u8]) -> Result<RoomMemberRequest, RcError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "rc.handlers.rooms", error = %e, "Invalid request body");
        RcError::InvalidInput("Invalid request body".to_string())
    })
}

fn parse_room_id(raw: &str) -> Result<RoomId, RcError> {
    raw.parse()
        .map_err(|_| RcError::RoomNotFound("Room not found".to_string()))
}
