//! Observability module for the Room Controller.
//!
//! Provides metrics definitions and the recorder setup.

pub mod metrics;
