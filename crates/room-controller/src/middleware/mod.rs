//! HTTP middleware for the Room Controller.
//!
//! - `http_metrics` - request/response metrics for every route

pub mod http_metrics;

pub use http_metrics::http_metrics_middleware;
