//! User registration handlers.
//!
//! - `POST /api/v1/users` - Register a user from the caller's address
//! - `GET /api/v1/users/{user_id}` - Look up a profile

use super::record_status;
use crate::errors::RcError;
use crate::identity::User;
use crate::models::{RegisterUserRequest, UserResponse};
use crate::routes::AppState;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    Json,
};
use common::types::UserId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler for POST /api/v1/users
///
/// # Response
///
/// - 201 Created: the new profile
/// - 400 Bad Request: malformed body, or an IPv6 peer that is not IPv4-mapped
#[instrument(
    skip_all,
    name = "rc.users.register",
    fields(
        method = "POST",
        endpoint = "/api/v1/users",
        status = tracing::field::Empty,
    )
)]
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<UserResponse>), RcError> {
    let result = async {
        // Deserialize manually to return 400 (not Axum's default 422)
        let request: RegisterUserRequest = serde_json::from_slice(&body).map_err(|e| {
            debug!(target: "rc.handlers.users", error = %e, "Invalid request body");
            RcError::InvalidInput("Invalid request body".to_string())
        })?;

        let origin = peer_ipv4(peer.ip()).ok_or_else(|| {
            debug!(target: "rc.handlers.users", peer = %peer, "Rejected IPv6 peer");
            RcError::InvalidInput("origin address must be an IPv4 address".to_string())
        })?;

        state
            .identity
            .register(&request.display_name, &origin.to_string())
            .await
    }
    .await;

    record_status(&result);
    Ok((StatusCode::CREATED, Json(result?)))
}

/// Handler for GET /api/v1/users/{user_id}
#[instrument(
    skip_all,
    name = "rc.users.get",
    fields(
        method = "GET",
        endpoint = "/api/v1/users/{user_id}",
        status = tracing::field::Empty,
    )
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, RcError> {
    let result = match user_id.parse::<UserId>() {
        Ok(user_id) => state.identity.lookup(user_id).await,
        Err(_) => Err(RcError::UserNotFound("User not found".to_string())),
    };

    record_status(&result);
    result.map(Json)
}

/// IPv4 peers pass through; IPv4-mapped IPv6 peers (dual-stack sockets)
/// are unwrapped; anything else has no IPv4 origin.
fn peer_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
