//! Identity registry.
//!
//! Registered users are immutable once created and are never deleted. The
//! registry is an explicit value owned by the application state; there is no
//! process-global table.

use crate::errors::RcError;
use common::types::UserId;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Opaque unique identifier.
    #[serde(rename = "user_id")]
    pub id: UserId,
    /// Free-form display name.
    pub display_name: String,
    /// Network address the user registered from.
    pub origin_address: Ipv4Addr,
}

/// Registry of users keyed by id.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    users: RwLock<HashMap<UserId, User>>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// Returns `RcError::InvalidInput` when `origin_address` is not an IPv4
    /// literal. IPv6 addresses and hostnames are rejected.
    pub async fn register(&self, display_name: &str, origin_address: &str) -> Result<User, RcError> {
        let origin_address: Ipv4Addr = origin_address.trim().parse().map_err(|_| {
            debug!(
                target: "rc.identity",
                origin_address = %origin_address,
                "Rejected registration with non-IPv4 origin address"
            );
            RcError::InvalidInput("origin address must be an IPv4 address".to_string())
        })?;

        let user = User {
            id: UserId::new(),
            display_name: display_name.to_string(),
            origin_address,
        };

        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());

        info!(
            target: "rc.identity",
            user_id = %user.id,
            registered_users = users.len(),
            "User registered"
        );

        Ok(user)
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns `RcError::UserNotFound` for unknown ids.
    pub async fn lookup(&self, id: UserId) -> Result<User, RcError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RcError::UserNotFound("User not found".to_string()))
    }

    /// Profiles for `ids`, in order, skipping unknown ids.
    pub async fn profiles(&self, ids: &[UserId]) -> Vec<User> {
        let users = self.users.read().await;
        ids.iter().filter_map(|id| users.get(id).cloned()).collect()
    }

    /// Number of registered users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
