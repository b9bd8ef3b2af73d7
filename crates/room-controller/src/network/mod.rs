//! Network process manager.
//!
//! Owns one tunnel-server process per room. Each process lives in the
//! supervised table from the moment it passes its startup probe until it is
//! stopped; manager shutdown reaps whatever is left.
//!
//! Per room the state machine is
//! `Uncreated -> Starting -> Active -> Stopping -> Terminated`. The first two
//! are a controller reservation plus a running `start_network` call, so only
//! the last three appear in [`LifecycleState`]. A failed start leaves nothing
//! behind: no working directory, no slot, no table entry.

pub mod launcher;

use crate::config::{Config, TunnelProtocol};
use crate::errors::RcError;
use crate::observability::metrics;
use crate::templates::{render_server_config, ServerConfigParams};
use chrono::{DateTime, Utc};
use common::types::{RoomId, UserId};
use launcher::{ProcessLauncher, TunnelProcess};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Server configuration file name inside a room's working directory.
pub const SERVER_CONFIG_FILE: &str = "server.conf";

/// Diffie-Hellman parameter file name inside a room's working directory.
pub const DH_PARAMS_FILE: &str = "dh.pem";

/// Per-member subdirectory inside a room's working directory.
pub const MEMBERS_DIR: &str = "members";

/// Lifecycle position of a running room and its network.
///
/// A room only exists from `Active` on; while its network starts it is a
/// reservation in the controller's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Stopping,
    Terminated,
}

/// Settings the network manager needs, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub work_dir: PathBuf,
    pub ca_cert_path: PathBuf,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
    pub protocol: TunnelProtocol,
    pub base_port: u16,
    pub max_rooms: u16,
    pub address_pool_base: Ipv4Addr,
    pub push_routes: Vec<String>,
    pub keepalive_interval_seconds: u32,
    pub keepalive_timeout_seconds: u32,
    pub dh_bits: u32,
    pub startup_probe: Duration,
    pub stop_grace_period: Duration,
}

impl NetworkSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            ca_cert_path: config.ca_cert_path(),
            server_cert_path: config.server_cert_path(),
            server_key_path: config.server_key_path(),
            protocol: config.protocol,
            base_port: config.base_port,
            max_rooms: config.max_rooms,
            address_pool_base: config.address_pool_base,
            push_routes: config.push_routes.clone(),
            keepalive_interval_seconds: config.keepalive_interval_seconds,
            keepalive_timeout_seconds: config.keepalive_timeout_seconds,
            dh_bits: config.dh_bits,
            startup_probe: config.startup_probe,
            stop_grace_period: config.stop_grace_period,
        }
    }

    /// Working directory of `room_id`.
    #[must_use]
    pub fn room_dir(&self, room_id: RoomId) -> PathBuf {
        self.work_dir.join(room_id.to_string())
    }
}

/// Reference to a supervised tunnel server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub room_id: RoomId,
    pub pid: Option<u32>,
    pub port: u16,
    pub subnet: Ipv4Addr,
    pub workdir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl NetworkHandle {
    /// Directory holding a member's client configuration.
    #[must_use]
    pub fn member_dir(&self, member_id: UserId) -> PathBuf {
        self.workdir.join(MEMBERS_DIR).join(member_id.to_string())
    }
}

/// Entry in the supervised table.
struct SupervisedProcess {
    process: Box<dyn TunnelProcess>,
    slot: u16,
    workdir: PathBuf,
}

/// Starts, supervises and stops tunnel servers.
pub struct NetworkManager {
    settings: NetworkSettings,
    launcher: Arc<dyn ProcessLauncher>,
    workers: Arc<Semaphore>,
    supervised: Mutex<HashMap<RoomId, SupervisedProcess>>,
    slots: Mutex<BTreeSet<u16>>,
}

impl NetworkManager {
    /// Create a manager.
    ///
    /// `workers` bounds concurrent DH generation; it is shared with the
    /// certificate issuer so key and parameter generation draw on one pool.
    #[must_use]
    pub fn new(
        settings: NetworkSettings,
        launcher: Arc<dyn ProcessLauncher>,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            settings,
            launcher,
            workers,
            supervised: Mutex::new(HashMap::new()),
            slots: Mutex::new(BTreeSet::new()),
        }
    }

    /// Start the tunnel server for `room_id`.
    ///
    /// # Errors
    ///
    /// - `RcError::CapacityExceeded` when every slot is taken
    /// - `RcError::ProcessLaunch` for missing PKI material, DH failure, spawn
    ///   failure or a server that dies during its startup probe
    #[instrument(skip_all, name = "rc.network.start", fields(room_id = %room_id))]
    pub async fn start_network(&self, room_id: RoomId) -> Result<NetworkHandle, RcError> {
        let slot = self.allocate_slot().await?;
        let workdir = self.settings.room_dir(room_id);

        match self.provision(room_id, slot, &workdir).await {
            Ok((process, handle)) => {
                self.supervised.lock().await.insert(
                    room_id,
                    SupervisedProcess {
                        process,
                        slot,
                        workdir,
                    },
                );

                info!(
                    target: "rc.network",
                    room_id = %room_id,
                    pid = ?handle.pid,
                    port = handle.port,
                    subnet = %handle.subnet,
                    "Tunnel server started"
                );
                Ok(handle)
            }
            Err(e) => {
                warn!(
                    target: "rc.network",
                    room_id = %room_id,
                    error = %e,
                    "Tunnel server failed to start, cleaning up"
                );
                remove_dir(&workdir).await;
                self.release_slot(slot).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        room_id: RoomId,
        slot: u16,
        workdir: &Path,
    ) -> Result<(Box<dyn TunnelProcess>, NetworkHandle), RcError> {
        let port = self
            .settings
            .base_port
            .checked_add(slot)
            .ok_or_else(|| RcError::CapacityExceeded("No tunnel port available".to_string()))?;
        let subnet = slot_subnet(self.settings.address_pool_base, slot)
            .ok_or_else(|| RcError::CapacityExceeded("Address pool exhausted".to_string()))?;

        tokio::fs::create_dir_all(workdir.join(MEMBERS_DIR)).await?;

        for (what, path) in [
            ("CA certificate", &self.settings.ca_cert_path),
            ("server certificate", &self.settings.server_cert_path),
            ("server key", &self.settings.server_key_path),
        ] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(RcError::ProcessLaunch(format!(
                    "{what} missing at {}",
                    path.display()
                )));
            }
        }

        let dh_path = workdir.join(DH_PARAMS_FILE);
        {
            let _permit = self
                .workers
                .acquire()
                .await
                .map_err(|e| RcError::Internal(format!("worker pool closed: {e}")))?;
            self.launcher
                .generate_dh_params(&dh_path, self.settings.dh_bits)
                .await?;
        }

        let rendered = render_server_config(&ServerConfigParams {
            protocol: self.settings.protocol,
            port,
            subnet,
            push_routes: &self.settings.push_routes,
            keepalive_interval_seconds: self.settings.keepalive_interval_seconds,
            keepalive_timeout_seconds: self.settings.keepalive_timeout_seconds,
            ca_path: &self.settings.ca_cert_path,
            cert_path: &self.settings.server_cert_path,
            key_path: &self.settings.server_key_path,
            dh_path: &dh_path,
        });
        let config_path = workdir.join(SERVER_CONFIG_FILE);
        tokio::fs::write(&config_path, rendered).await?;

        let mut process = self.launcher.launch(room_id, &config_path, workdir).await?;

        tokio::time::sleep(self.settings.startup_probe).await;
        if !process.is_alive() {
            let tail = process.output_tail();
            if let Err(e) = process.force_kill().await {
                debug!(target: "rc.network", room_id = %room_id, error = %e, "Reaping failed child");
            }
            return Err(RcError::ProcessLaunch(format!(
                "tunnel server exited during startup: {tail}"
            )));
        }

        let handle = NetworkHandle {
            room_id,
            pid: process.id(),
            port,
            subnet,
            workdir: workdir.to_path_buf(),
            started_at: Utc::now(),
        };

        Ok((process, handle))
    }

    /// Stop the tunnel server behind `handle`.
    ///
    /// Never fails: a server that ignores graceful termination is killed once
    /// `grace_period` elapses, and a failing kill is only logged. Stopping an
    /// unknown or already-stopped handle is a no-op.
    #[instrument(skip_all, name = "rc.network.stop", fields(room_id = %handle.room_id))]
    pub async fn stop_network(&self, handle: &NetworkHandle, grace_period: Duration) {
        let entry = self.supervised.lock().await.remove(&handle.room_id);

        let Some(entry) = entry else {
            debug!(
                target: "rc.network",
                room_id = %handle.room_id,
                "Stop requested for unsupervised network, ignoring"
            );
            return;
        };

        let slot = entry.slot;
        let workdir = entry.workdir.clone();
        terminate(handle.room_id, entry.process, grace_period).await;
        remove_dir(&workdir).await;
        self.release_slot(slot).await;

        info!(
            target: "rc.network",
            room_id = %handle.room_id,
            "Tunnel server stopped"
        );
    }

    /// Non-blocking liveness poll.
    pub async fn is_alive(&self, handle: &NetworkHandle) -> bool {
        self.supervised
            .lock()
            .await
            .get_mut(&handle.room_id)
            .is_some_and(|entry| entry.process.is_alive())
    }

    /// Number of supervised processes.
    pub async fn active_count(&self) -> usize {
        self.supervised.lock().await.len()
    }

    /// Stop every supervised process concurrently.
    #[instrument(skip_all, name = "rc.network.shutdown")]
    pub async fn shutdown(&self) {
        let entries: Vec<(RoomId, SupervisedProcess)> =
            self.supervised.lock().await.drain().collect();

        if entries.is_empty() {
            return;
        }

        info!(
            target: "rc.network",
            count = entries.len(),
            "Reaping supervised tunnel servers"
        );

        let grace = self.settings.stop_grace_period;
        let mut reaped = JoinSet::new();
        for (room_id, entry) in entries {
            reaped.spawn(async move {
                terminate(room_id, entry.process, grace).await;
                remove_dir(&entry.workdir).await;
                entry.slot
            });
        }

        while let Some(result) = reaped.join_next().await {
            match result {
                Ok(slot) => self.release_slot(slot).await,
                Err(e) => error!(
                    target: "rc.network",
                    error = %e,
                    "Reaper task failed"
                ),
            }
        }
    }

    async fn allocate_slot(&self) -> Result<u16, RcError> {
        let mut slots = self.slots.lock().await;
        let free = (0..self.settings.max_rooms).find(|slot| !slots.contains(slot));
        match free {
            Some(slot) => {
                slots.insert(slot);
                Ok(slot)
            }
            None => Err(RcError::CapacityExceeded(
                "No network capacity for another room".to_string(),
            )),
        }
    }

    async fn release_slot(&self, slot: u16) {
        self.slots.lock().await.remove(&slot);
    }
}

/// The /24 owned by `slot`, counting up from `base`'s /24.
fn slot_subnet(base: Ipv4Addr, slot: u16) -> Option<Ipv4Addr> {
    let network = u32::from(base) & 0xFFFF_FF00;
    network
        .checked_add(u32::from(slot) << 8)
        .map(Ipv4Addr::from)
}

/// Graceful termination, escalating to a kill after `grace_period`.
async fn terminate(room_id: RoomId, mut process: Box<dyn TunnelProcess>, grace_period: Duration) {
    let graceful = match process.request_stop() {
        Ok(()) => match tokio::time::timeout(grace_period, process.wait()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(target: "rc.network", room_id = %room_id, error = %e, "Wait after SIGTERM failed");
                false
            }
            Err(_) => false,
        },
        Err(e) => {
            warn!(target: "rc.network", room_id = %room_id, error = %e, "Graceful stop request failed");
            false
        }
    };

    if graceful {
        debug!(target: "rc.network", room_id = %room_id, "Tunnel server exited gracefully");
        return;
    }

    warn!(
        target: "rc.network",
        room_id = %room_id,
        grace_ms = u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX),
        "ForcedKill: tunnel server did not exit within grace period"
    );
    metrics::record_forced_kill();

    if let Err(e) = process.force_kill().await {
        let err = RcError::ProcessTermination(e.to_string());
        error!(
            target: "rc.network",
            room_id = %room_id,
            error = %err,
            "Forced kill failed"
        );
    }
}

async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            target: "rc.network",
            path = %path.display(),
            error = %e,
            "Failed to remove room working directory"
        ),
    }
}
