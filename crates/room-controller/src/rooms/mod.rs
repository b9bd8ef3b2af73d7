//! Room session orchestration.
//!
//! Actor hierarchy:
//!
//! ```text
//! RoomControllerActor (singleton, owns the room registry)
//! └── RoomActor (one per room, owns membership and the room's network)
//! ```
//!
//! A room's mailbox is its exclusive lock: joins and leaves for one room are
//! applied one at a time, so the last leave and a concurrent join can never
//! interleave. Rooms never wait on each other.
//!
//! [`RoomSessionManager`] is the public facade. It consults the identity
//! registry, starts networks between reserve and commit, and rolls back any
//! partially-created room.

pub mod controller;
pub mod manager;
pub mod messages;
pub mod room;

pub use controller::RoomControllerActorHandle;
pub use manager::RoomSessionManager;
pub use messages::{ControllerStatus, JoinView, LeaveView, RoomSummary, RoomView};
pub use room::RoomActorHandle;

use crate::certs::{CertificateAuthority, CertificateIssuer};
use crate::config::{Config, TunnelProtocol};
use crate::errors::RcError;
use crate::network::launcher::ProcessLauncher;
use crate::network::{NetworkHandle, NetworkManager, NetworkSettings};
use crate::templates::{render_client_config, ClientConfigParams};
use common::secret::ExposeSecret;
use common::types::{RoomId, UserId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Client configuration file name inside a member directory.
pub const CLIENT_CONFIG_FILE: &str = "client.ovpn";

/// What clients need to reach a tunnel server.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    /// Address clients connect to.
    pub public_host: String,
    pub protocol: TunnelProtocol,
    /// PEM of the CA that signed the tunnel servers' certificate.
    pub ca_pem: Vec<u8>,
}

/// Collaborators shared by the manager, the controller and every room.
pub struct RoomServices {
    pub network: Arc<NetworkManager>,
    pub issuer: Arc<CertificateIssuer>,
    pub client: ClientProfile,
    /// Grace period given to a tunnel server before it is killed.
    pub stop_grace_period: Duration,
}

impl RoomServices {
    /// Wire the network manager and certificate issuer from `config`.
    ///
    /// Both share one worker semaphore of `config.worker_permits` permits.
    #[must_use]
    pub fn from_config(
        config: &Config,
        ca_pem: Vec<u8>,
        launcher: Arc<dyn ProcessLauncher>,
        authority: Arc<dyn CertificateAuthority>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_permits));
        let network = NetworkManager::new(
            NetworkSettings::from_config(config),
            launcher,
            Arc::clone(&workers),
        );

        Self {
            network: Arc::new(network),
            issuer: Arc::new(CertificateIssuer::new(authority, workers)),
            client: ClientProfile {
                public_host: config.public_host.clone(),
                protocol: config.protocol,
                ca_pem,
            },
            stop_grace_period: config.stop_grace_period,
        }
    }

    /// Issue a fresh credential for `member_id`, render its client
    /// configuration and persist it under the member directory.
    ///
    /// On failure nothing is left in the member directory.
    pub(crate) async fn provision_member(
        &self,
        room_id: RoomId,
        member_id: UserId,
        network: &NetworkHandle,
    ) -> Result<String, RcError> {
        let member_dir = network.member_dir(member_id);

        let result = async {
            let credential = self.issuer.issue(room_id, member_id, &member_dir).await?;
            let client_config = render_client_config(&ClientConfigParams {
                protocol: self.client.protocol,
                remote_host: &self.client.public_host,
                port: network.port,
                ca_pem: &self.client.ca_pem,
                cert_pem: &credential.certificate,
                key_pem: credential.private_key.expose_secret(),
            })?;
            tokio::fs::write(member_dir.join(CLIENT_CONFIG_FILE), &client_config).await?;
            Ok::<_, RcError>(client_config)
        }
        .await;

        if result.is_err() {
            remove_member_dir(&member_dir).await;
        }
        result
    }
}

/// Remove a member directory, tolerating its absence.
pub(crate) async fn remove_member_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            target: "rc.actor.room",
            path = %path.display(),
            error = %e,
            "Failed to remove member directory"
        ),
    }
}
