//! HTTP routes for the Room Controller.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::identity::IdentityRegistry;
use crate::middleware::http_metrics_middleware;
use crate::rooms::RoomSessionManager;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
///
/// Owns the registries explicitly; `main` builds it and shuts the manager
/// down after the server stops.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RoomSessionManager>,
    pub identity: Arc<IdentityRegistry>,
    pub config: Config,
}

/// Build the application routes.
///
/// - `/health` - status with room and user counts
/// - `/metrics` - Prometheus metrics
/// - `/api/v1/users` - register, `/api/v1/users/{user_id}` - profile
/// - `/api/v1/rooms` - list and create
/// - `/api/v1/rooms/{room_id}` - member profiles
/// - `/api/v1/rooms/{room_id}/join`, `/api/v1/rooms/{room_id}/leave`
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    apply_layers(api_routes(state).merge(metrics_routes))
}

fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/users", post(handlers::register_user))
        .route("/api/v1/users/:user_id", get(handlers::get_user))
        .route(
            "/api/v1/rooms",
            get(handlers::list_rooms).post(handlers::create_room),
        )
        .route("/api/v1/rooms/:room_id", get(handlers::room_detail))
        .route("/api/v1/rooms/:room_id/join", post(handlers::join_room))
        .route("/api/v1/rooms/:room_id/leave", post(handlers::leave_room))
        .with_state(state)
}

// Layer order (bottom-to-top execution):
// 1. TimeoutLayer - Timeout the request (innermost)
// 2. TraceLayer - Log request details
// 3. CorsLayer - Any origin, method and header
// 4. http_metrics_middleware - Record ALL responses (outermost)
fn apply_layers(router: Router) -> Router {
    router
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
