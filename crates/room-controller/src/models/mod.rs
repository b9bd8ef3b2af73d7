//! Room Controller request and response bodies.

use crate::identity::User;
use crate::rooms::{JoinView, LeaveView, RoomSummary, RoomView};
use common::types::{RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/users`.
///
/// The origin address is taken from the connection, never from the body.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserRequest {
    pub display_name: String,
}

/// Body of the room create, join and leave endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomMemberRequest {
    pub user_id: UserId,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown started.
    pub status: String,
    pub active_rooms: usize,
    pub registered_users: usize,
}

/// Response of `POST /api/v1/rooms`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub host: UserId,
    pub members: Vec<UserId>,
    /// The host's client configuration.
    pub client_config: String,
}

impl From<RoomView> for CreateRoomResponse {
    fn from(view: RoomView) -> Self {
        Self {
            room_id: view.room_id,
            host: view.host,
            members: view.members,
            client_config: view.client_config,
        }
    }
}

/// Response of `POST /api/v1/rooms/{room_id}/join`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinRoomResponse {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
    pub client_config: String,
}

impl From<JoinView> for JoinRoomResponse {
    fn from(view: JoinView) -> Self {
        Self {
            room_id: view.room_id,
            members: view.members,
            client_config: view.client_config,
        }
    }
}

/// Response of `POST /api/v1/rooms/{room_id}/leave`.
#[derive(Debug, Clone, Serialize)]
pub struct LeaveRoomResponse {
    pub room_id: RoomId,
    /// Empty once the room was destroyed.
    pub members: Vec<UserId>,
}

impl From<LeaveView> for LeaveRoomResponse {
    fn from(view: LeaveView) -> Self {
        Self {
            room_id: view.room_id,
            members: view.members,
        }
    }
}

/// One entry of `GET /api/v1/rooms`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummaryResponse {
    pub room_id: RoomId,
    pub member_count: usize,
}

impl From<RoomSummary> for RoomSummaryResponse {
    fn from(summary: RoomSummary) -> Self {
        Self {
            room_id: summary.room_id,
            member_count: summary.member_count,
        }
    }
}

/// Public profile of a user, as returned by the user and room detail endpoints.
pub type UserResponse = User;
