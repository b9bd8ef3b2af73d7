//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC) service.
//!
//! This crate provides:
//! - Fixtures: PKI material, configuration and application state backed by
//!   the fake launcher and certificate authority
//! - Server test harness (`TestRoomServer` for E2E tests over real HTTP)
//! - `ApiClient`, a thin `reqwest` wrapper over the HTTP API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRoomServer::spawn().await?;
//!     let client = ApiClient::new(server.url());
//!
//!     let alice = client.register("alice").await?;
//!     let room = client.create_room(&alice).await?;
//!     assert_eq!(room["members"][0], alice);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use client::*;
pub use fixtures::*;
pub use server_harness::*;
