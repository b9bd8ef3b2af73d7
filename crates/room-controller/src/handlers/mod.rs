//! HTTP request handlers for the Room Controller.

pub mod health;
pub mod metrics;
pub mod rooms;
pub mod users;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use rooms::{create_room, join_room, leave_room, list_rooms, room_detail};
pub use users::{get_user, register_user};

use crate::errors::RcError;

/// Record the outcome of a handler on its span's `status` field.
fn record_status<T>(result: &Result<T, RcError>) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    };
    tracing::Span::current().record("status", status);
}
