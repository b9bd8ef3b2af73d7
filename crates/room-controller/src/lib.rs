//! Room Controller (RC) Service Library
//!
//! Orchestrates per-room virtual private networks:
//!
//! - Identity registry of users and the address they registered from
//! - One supervised tunnel-server process per room, with its own port and /24
//! - Per-member credentials signed by a long-lived certificate authority
//! - Room lifecycle: create, join, leave, destroy on last leave
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> rooms::RoomSessionManager
//!                                     ├── identity::IdentityRegistry
//!                                     ├── rooms::controller (actor) -> rooms::room (actor per room)
//!                                     ├── network::NetworkManager -> network::launcher::ProcessLauncher
//!                                     └── certs::CertificateIssuer -> certs::CertificateAuthority
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `identity` - User registry
//! - `network` - Tunnel-server supervision
//! - `certs` - Credential issuance
//! - `templates` - Server and client configuration rendering
//! - `rooms` - Room actors and the session manager
//! - `handlers`, `models`, `routes`, `middleware` - HTTP adapter
//! - `observability` - Prometheus metrics

pub mod certs;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod network;
pub mod observability;
pub mod rooms;
pub mod routes;
pub mod templates;
