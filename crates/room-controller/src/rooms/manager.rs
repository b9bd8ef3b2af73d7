//! `RoomSessionManager` - public facade over identity, networks and rooms.

use super::controller::RoomControllerActorHandle;
use super::messages::{ControllerStatus, JoinView, LeaveView, RoomSummary, RoomView};
use super::RoomServices;
use crate::errors::RcError;
use crate::identity::{IdentityRegistry, User};
use crate::network::NetworkHandle;
use common::types::{RoomId, UserId};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Coordinates room creation, membership changes and teardown.
///
/// Creation is the only multi-step operation that runs outside a room actor:
/// reserve, start network, provision the host, commit. A failure at any step
/// undoes the earlier ones before the error is returned.
pub struct RoomSessionManager {
    identity: Arc<IdentityRegistry>,
    controller: RoomControllerActorHandle,
    services: Arc<RoomServices>,
}

impl RoomSessionManager {
    /// Create a manager and spawn its controller actor.
    #[must_use]
    pub fn new(
        identity: Arc<IdentityRegistry>,
        services: Arc<RoomServices>,
        allow_multiple_rooms_per_host: bool,
    ) -> Self {
        let controller =
            RoomControllerActorHandle::new(Arc::clone(&services), allow_multiple_rooms_per_host);
        Self {
            identity,
            controller,
            services,
        }
    }

    /// Create a room hosted by `host_id`, with the host as its only member.
    ///
    /// # Errors
    ///
    /// - `RcError::UserNotFound` if the host is not registered
    /// - `RcError::Conflict` if the host policy forbids another room
    /// - `RcError::CapacityExceeded` if no network slot is free
    /// - `RcError::Draining` during shutdown
    /// - Network and credential pipeline errors
    #[instrument(skip_all, name = "rc.rooms.create", fields(host_id = %host_id))]
    pub async fn create_room(&self, host_id: UserId) -> Result<RoomView, RcError> {
        self.identity.lookup(host_id).await?;

        let room_id = RoomId::new();
        self.controller.reserve(room_id, host_id).await?;

        let network = match self.services.network.start_network(room_id).await {
            Ok(network) => network,
            Err(e) => {
                self.controller.abort(room_id).await;
                return Err(e);
            }
        };

        let client_config = match self
            .services
            .provision_member(room_id, host_id, &network)
            .await
        {
            Ok(client_config) => client_config,
            Err(e) => {
                self.rollback(room_id, &network).await;
                return Err(e);
            }
        };

        if let Err(e) = self.controller.commit(room_id, network.clone()).await {
            self.rollback(room_id, &network).await;
            return Err(e);
        }

        info!(
            target: "rc.rooms",
            room_id = %room_id,
            host_id = %host_id,
            port = network.port,
            subnet = %network.subnet,
            "Room ready"
        );

        Ok(RoomView {
            room_id,
            host: host_id,
            members: vec![host_id],
            client_config,
        })
    }

    /// Add `member_id` to `room_id` and return its client configuration.
    #[instrument(skip_all, name = "rc.rooms.join", fields(room_id = %room_id, member_id = %member_id))]
    pub async fn join_room(&self, room_id: RoomId, member_id: UserId) -> Result<JoinView, RcError> {
        let room = self.controller.get(room_id).await?;
        self.identity.lookup(member_id).await?;
        room.join(member_id).await
    }

    /// Remove `member_id` from `room_id`. Destroys the room when it empties.
    #[instrument(skip_all, name = "rc.rooms.leave", fields(room_id = %room_id, member_id = %member_id))]
    pub async fn leave_room(&self, room_id: RoomId, member_id: UserId) -> Result<LeaveView, RcError> {
        let room = self.controller.get(room_id).await?;
        self.identity.lookup(member_id).await?;
        room.leave(member_id).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, RcError> {
        self.controller.list().await
    }

    /// Member profiles of `room_id` in join order.
    pub async fn room_detail(&self, room_id: RoomId) -> Result<Vec<User>, RcError> {
        let room = self.controller.get(room_id).await?;
        let members = room.members().await?;
        Ok(self.identity.profiles(&members).await)
    }

    pub async fn status(&self) -> Result<ControllerStatus, RcError> {
        self.controller.get_status().await
    }

    /// Stop accepting rooms, stop every room, then reap any process still
    /// in the supervised table.
    pub async fn shutdown(&self) {
        info!(target: "rc.rooms", "Room session manager shutting down");
        self.controller.shutdown().await;
        self.services.network.shutdown().await;
    }

    async fn rollback(&self, room_id: RoomId, network: &NetworkHandle) {
        warn!(
            target: "rc.rooms",
            room_id = %room_id,
            "Rolling back partially created room"
        );
        self.services
            .network
            .stop_network(network, self.services.stop_grace_period)
            .await;
        self.controller.abort(room_id).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{harness, harness_with, Harness};
    use super::*;
    use crate::certs::mock::FakeAuthority;
    use crate::network::launcher::mock::FakeLauncher;

    fn manager(h: &Harness) -> (RoomSessionManager, Arc<IdentityRegistry>) {
        let identity = Arc::new(IdentityRegistry::new());
        let manager = RoomSessionManager::new(Arc::clone(&identity), Arc::clone(&h.services), true);
        (manager, identity)
    }

    #[tokio::test]
    async fn test_full_room_lifecycle() {
        let h = harness();
        let (manager, identity) = manager(&h);
        let alice = identity.register("alice", "10.0.0.1").await.unwrap();
        let bob = identity.register("bob", "10.0.0.2").await.unwrap();

        let created = manager.create_room(alice.id).await.unwrap();
        assert_eq!(created.members, vec![alice.id]);
        assert_eq!(created.host, alice.id);

        let joined = manager.join_room(created.room_id, bob.id).await.unwrap();
        assert_eq!(joined.members, vec![alice.id, bob.id]);
        assert_ne!(joined.client_config, created.client_config);

        let detail = manager.room_detail(created.room_id).await.unwrap();
        let names: Vec<_> = detail.iter().map(|u| u.display_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let left = manager.leave_room(created.room_id, alice.id).await.unwrap();
        assert_eq!(left.members, vec![bob.id]);

        let left = manager.leave_room(created.room_id, bob.id).await.unwrap();
        assert!(left.members.is_empty());

        assert!(manager.list_rooms().await.unwrap().is_empty());
        assert!(!h.launcher.process(created.room_id).unwrap().is_alive());
        assert_eq!(h.services.network.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_room_requires_registered_host() {
        let h = harness();
        let (manager, _identity) = manager(&h);

        let result = manager.create_room(UserId::new()).await;

        assert!(matches!(result, Err(RcError::UserNotFound(_))));
        assert!(manager.list_rooms().await.unwrap().is_empty());
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_leaves_no_room() {
        let h = harness_with(FakeLauncher::failing_launch(), FakeAuthority::accepting());
        let (manager, identity) = manager(&h);
        let host = identity.register("host", "10.0.0.1").await.unwrap();

        let result = manager.create_room(host.id).await;

        assert!(matches!(result, Err(RcError::ProcessLaunch(_))));
        let status = manager.status().await.unwrap();
        assert_eq!(status.active_rooms, 0);
        assert_eq!(status.pending_rooms, 0);
        assert_eq!(h.services.network.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_host_credential_failure_rolls_back_network() {
        let h = harness_with(FakeLauncher::healthy(), FakeAuthority::failing_sign());
        let (manager, identity) = manager(&h);
        let host = identity.register("host", "10.0.0.1").await.unwrap();

        let result = manager.create_room(host.id).await;

        assert!(matches!(result, Err(RcError::Signing(_))));
        assert_eq!(h.launcher.alive_count(), 0);
        assert_eq!(h.services.network.active_count().await, 0);
        assert_eq!(manager.status().await.unwrap().pending_rooms, 0);
        assert_eq!(std::fs::read_dir(h.root.path().join("rooms")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_join_unknown_room_or_user() {
        let h = harness();
        let (manager, identity) = manager(&h);
        let host = identity.register("host", "10.0.0.1").await.unwrap();
        let room = manager.create_room(host.id).await.unwrap();

        assert!(matches!(
            manager.join_room(RoomId::new(), host.id).await,
            Err(RcError::RoomNotFound(_))
        ));
        assert!(matches!(
            manager.join_room(room.room_id, UserId::new()).await,
            Err(RcError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejoin_issues_new_credential() {
        let h = harness();
        let (manager, identity) = manager(&h);
        let host = identity.register("host", "10.0.0.1").await.unwrap();
        let guest = identity.register("guest", "10.0.0.2").await.unwrap();
        let room = manager.create_room(host.id).await.unwrap();

        let first = manager.join_room(room.room_id, guest.id).await.unwrap();
        manager.leave_room(room.room_id, guest.id).await.unwrap();
        let second = manager.join_room(room.room_id, guest.id).await.unwrap();

        assert_ne!(first.client_config, second.client_config);
        assert_eq!(second.members, vec![host.id, guest.id]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_networks() {
        let h = harness();
        let (manager, identity) = manager(&h);
        for i in 0..3 {
            let user = identity
                .register(&format!("user-{i}"), "10.0.0.1")
                .await
                .unwrap();
            manager.create_room(user.id).await.unwrap();
        }
        assert_eq!(h.launcher.alive_count(), 3);

        manager.shutdown().await;

        assert_eq!(h.launcher.alive_count(), 0);
        assert_eq!(h.services.network.active_count().await, 0);
        assert!(matches!(
            manager.create_room(UserId::new()).await,
            Err(RcError::UserNotFound(_))
        ));
    }
}
