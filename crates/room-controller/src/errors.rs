//! Room Controller error types.
//!
//! Every failure the core can produce maps to a distinct, stable error code so
//! clients can branch on it. Messages for internal faults (process lifecycle,
//! credential pipeline, internal) are generic on the wire; the actual detail is
//! logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room Controller error type.
///
/// Maps to HTTP status codes:
/// - `InvalidInput`: 400 Bad Request
/// - `UserNotFound`, `RoomNotFound`: 404 Not Found
/// - `AlreadyMember`, `NotAMember`, `Conflict`: 409 Conflict
/// - `ProcessLaunch`, `Signing`: 502 Bad Gateway (external engine failed)
/// - `CapacityExceeded`, `Draining`: 503 Service Unavailable
/// - `ProcessTermination`, `KeyGeneration`, `Internal`: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RcError {
    /// Malformed identity data (e.g. a non-IPv4 origin address).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown user id.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Unknown room id (or a room that is being torn down).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The user is already a member of the room.
    #[error("Already a member: {0}")]
    AlreadyMember(String),

    /// The user is not a member of the room.
    #[error("Not a member: {0}")]
    NotAMember(String),

    /// Generic conflict (e.g. host already owns a room when the policy forbids it).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No free network slot for another room.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The controller is shutting down.
    #[error("Room controller is draining")]
    Draining,

    /// The tunnel-server process could not be launched.
    #[error("Process launch error: {0}")]
    ProcessLaunch(String),

    /// The tunnel-server process could not be terminated.
    #[error("Process termination error: {0}")]
    ProcessTermination(String),

    /// Key or signing-request generation failed.
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// The certificate authority rejected or could not sign the request.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the stable error code clients branch on.
    pub fn code(&self) -> &'static str {
        match self {
            RcError::InvalidInput(_) => "INVALID_INPUT",
            RcError::UserNotFound(_) | RcError::RoomNotFound(_) => "NOT_FOUND",
            RcError::AlreadyMember(_) => "ALREADY_MEMBER",
            RcError::NotAMember(_) => "NOT_A_MEMBER",
            RcError::Conflict(_) => "CONFLICT",
            RcError::CapacityExceeded(_) | RcError::Draining => "UNAVAILABLE",
            RcError::ProcessLaunch(_) => "PROCESS_LAUNCH_ERROR",
            RcError::ProcessTermination(_) => "PROCESS_TERMINATION_ERROR",
            RcError::KeyGeneration(_) => "KEY_GENERATION_ERROR",
            RcError::Signing(_) => "SIGNING_ERROR",
            RcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RcError::InvalidInput(_) => 400,
            RcError::UserNotFound(_) | RcError::RoomNotFound(_) => 404,
            RcError::AlreadyMember(_) | RcError::NotAMember(_) | RcError::Conflict(_) => 409,
            RcError::ProcessLaunch(_) | RcError::Signing(_) => 502,
            RcError::CapacityExceeded(_) | RcError::Draining => 503,
            RcError::ProcessTermination(_) | RcError::KeyGeneration(_) | RcError::Internal(_) => {
                500
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            RcError::InvalidInput(msg)
            | RcError::UserNotFound(msg)
            | RcError::RoomNotFound(msg)
            | RcError::AlreadyMember(msg)
            | RcError::NotAMember(msg)
            | RcError::Conflict(msg)
            | RcError::CapacityExceeded(msg) => msg.clone(),
            RcError::Draining => "Server is shutting down, please retry later".to_string(),
            RcError::ProcessLaunch(_) => {
                "The room network could not be started, please retry".to_string()
            }
            RcError::Signing(_) | RcError::KeyGeneration(_) => {
                "Credentials could not be issued".to_string()
            }
            RcError::ProcessTermination(_) | RcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
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

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            // Log actual error server-side, the client only sees the generic message
            tracing::error!(target: "rc.errors", error = %self, code = self.code(), "Request failed");
        }

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<std::io::Error> for RcError {
    fn from(err: std::io::Error) -> Self {
        RcError::Internal(format!("I/O error: {err}"))
    }
}
