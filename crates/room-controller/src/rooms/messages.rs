//! Actor messages and the views they return.

use super::room::RoomActorHandle;
use crate::errors::RcError;
use crate::network::NetworkHandle;
use common::types::{RoomId, UserId};
use tokio::sync::oneshot;

/// Messages handled by the `RoomControllerActor`.
///
/// None of them wait on network or credential work; the controller only
/// swaps room existence.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Reserve `room_id` for `host_id` before its network is started.
    Reserve {
        room_id: RoomId,
        host_id: UserId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Turn a reservation into a live room and spawn its actor.
    Commit {
        room_id: RoomId,
        network: NetworkHandle,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Drop a reservation whose creation failed.
    Abort {
        room_id: RoomId,
        respond_to: oneshot::Sender<()>,
    },

    /// Look up a committed room.
    Get {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Remove a room whose last member left (sent by the room itself).
    Remove {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// List committed rooms.
    List {
        respond_to: oneshot::Sender<Vec<RoomSummary>>,
    },

    /// Get controller status.
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting rooms and stop every room.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        member_id: UserId,
        respond_to: oneshot::Sender<Result<JoinView, RcError>>,
    },

    Leave {
        member_id: UserId,
        respond_to: oneshot::Sender<Result<LeaveView, RcError>>,
    },

    Members {
        respond_to: oneshot::Sender<Result<Vec<UserId>, RcError>>,
    },
}

/// Controller status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Committed rooms.
    pub active_rooms: usize,
    /// Reservations still being created.
    pub pending_rooms: usize,
    pub is_draining: bool,
}

/// A committed room and its current size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub member_count: usize,
}

/// Result of creating a room.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub room_id: RoomId,
    pub host: UserId,
    pub members: Vec<UserId>,
    /// The host's client configuration.
    pub client_config: String,
}

/// Result of joining a room.
#[derive(Debug, Clone)]
pub struct JoinView {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
    /// The joining member's client configuration.
    pub client_config: String,
}

/// Result of leaving a room. `members` is empty when the room was destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveView {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
}
