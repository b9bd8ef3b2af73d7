//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Handler for GET /health
///
/// Reports `"draining"` once shutdown started so load balancers stop
/// sending new rooms here. A stopped controller counts as draining.
#[tracing::instrument(skip_all, name = "rc.health")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (draining, active_rooms) = match state.manager.status().await {
        Ok(status) => (status.is_draining, status.active_rooms),
        Err(e) => {
            tracing::debug!(target: "rc.handlers.health", error = %e, "Controller unavailable");
            (true, 0)
        }
    };

    Json(HealthResponse {
        status: if draining { "draining" } else { "ok" }.to_string(),
        active_rooms,
        registered_users: state.identity.len().await,
    })
}
