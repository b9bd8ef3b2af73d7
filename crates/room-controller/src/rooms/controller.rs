//! `RoomControllerActor` - singleton owner of the room registry.
//!
//! The controller:
//!
//! - Reserves room ids while their network is being started, so a
//!   half-created room is never listed or joinable
//! - Spawns a `RoomActor` when a reservation is committed
//! - Enforces the one-room-per-host policy when it is enabled
//! - Owns the root `CancellationToken`; every room gets a child token
//! - Reaps room actors that exit unexpectedly and stops their networks
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops accepting reservations, cancels every
//! room (each room stops its own network), and waits for the room tasks.

use super::messages::{ControllerMessage, ControllerStatus, RoomSummary};
use super::room::{RoomActor, RoomActorHandle};
use super::RoomServices;
use crate::errors::RcError;
use crate::network::NetworkHandle;
use crate::observability::metrics;
use common::types::{RoomId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Extra time on top of the stop grace period a room gets to exit at shutdown.
const ROOM_SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

/// Handle to the `RoomControllerActor`.
#[derive(Clone)]
pub struct RoomControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl RoomControllerActorHandle {
    /// Create a new `RoomControllerActor` and return a handle to it.
    ///
    /// # Arguments
    ///
    /// * `services` - Collaborators handed to every room
    /// * `allow_multiple_rooms_per_host` - When `false`, a host owning a room
    ///   (or a pending reservation) cannot reserve another
    #[must_use]
    pub fn new(services: Arc<RoomServices>, allow_multiple_rooms_per_host: bool) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomControllerActor {
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            accepting_new: true,
            allow_multiple_rooms_per_host,
            services,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Reserve `room_id` for `host_id`.
    ///
    /// # Errors
    ///
    /// - `RcError::Draining` once shutdown started
    /// - `RcError::Conflict` if the id is taken or the host policy forbids it
    pub async fn reserve(&self, room_id: RoomId, host_id: UserId) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Reserve {
                room_id,
                host_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RcError::Draining)?;

        rx.await.map_err(|_| RcError::Draining)?
    }

    /// Commit a reservation, spawning the room actor.
    ///
    /// On error the caller still owns `network` and must stop it.
    pub async fn commit(
        &self,
        room_id: RoomId,
        network: NetworkHandle,
    ) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Commit {
                room_id,
                network,
                respond_to: tx,
            })
            .await
            .map_err(|_| RcError::Draining)?;

        rx.await.map_err(|_| RcError::Draining)?
    }

    /// Drop a reservation. No-op for unknown or committed ids.
    pub async fn abort(&self, room_id: RoomId) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ControllerMessage::Abort {
                room_id,
                respond_to: tx,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Look up a committed room.
    pub async fn get(&self, room_id: RoomId) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Get {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// List committed rooms.
    pub async fn list(&self) -> Result<Vec<RoomSummary>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::List { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting rooms and stop every room. Returns once all rooms exited.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ControllerMessage::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Registry entry.
enum RoomEntry {
    /// Network being started; invisible to readers.
    Reserved { host_id: UserId },
    Active(ManagedRoom),
}

impl RoomEntry {
    fn host_id(&self) -> UserId {
        match self {
            RoomEntry::Reserved { host_id } => *host_id,
            RoomEntry::Active(managed) => managed.handle.host_id(),
        }
    }
}

/// Internal state for a live room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Given to rooms so they can remove themselves; weak so the mailbox
    /// closes once every external handle is gone.
    self_sender: mpsc::WeakSender<ControllerMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, RoomEntry>,
    accepting_new: bool,
    allow_multiple_rooms_per_host: bool,
    services: Arc<RoomServices>,
}

impl RoomControllerActor {
    #[instrument(skip_all, name = "rc.actor.controller")]
    async fn run(mut self) {
        info!(target: "rc.actor.controller", "RoomControllerActor started");

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.controller",
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ControllerMessage::Shutdown { respond_to }) => {
                            self.graceful_shutdown().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(
                                target: "rc.actor.controller",
                                "RoomControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.controller",
            rooms_remaining = self.rooms.len(),
            "RoomControllerActor stopped"
        );
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Reserve {
                room_id,
                host_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.reserve(room_id, host_id));
            }

            ControllerMessage::Commit {
                room_id,
                network,
                respond_to,
            } => {
                let _ = respond_to.send(self.commit(room_id, network));
            }

            ControllerMessage::Abort {
                room_id,
                respond_to,
            } => {
                self.abort(room_id);
                let _ = respond_to.send(());
            }

            ControllerMessage::Get {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.get(room_id));
            }

            ControllerMessage::Remove {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove(room_id));
            }

            ControllerMessage::List { respond_to } => {
                let _ = respond_to.send(self.list());
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            // Handled in the run loop
            ControllerMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn reserve(&mut self, room_id: RoomId, host_id: UserId) -> Result<(), RcError> {
        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        if self.rooms.contains_key(&room_id) {
            return Err(RcError::Conflict("Room already exists".to_string()));
        }

        if !self.allow_multiple_rooms_per_host
            && self.rooms.values().any(|entry| entry.host_id() == host_id)
        {
            return Err(RcError::Conflict("Host already owns a room".to_string()));
        }

        self.rooms.insert(room_id, RoomEntry::Reserved { host_id });

        debug!(
            target: "rc.actor.controller",
            room_id = %room_id,
            host_id = %host_id,
            "Room reserved"
        );

        Ok(())
    }

    fn commit(&mut self, room_id: RoomId, network: NetworkHandle) -> Result<RoomActorHandle, RcError> {
        let host_id = match self.rooms.get(&room_id) {
            Some(RoomEntry::Reserved { host_id }) => *host_id,
            Some(RoomEntry::Active(_)) => {
                return Err(RcError::Conflict("Room already exists".to_string()))
            }
            // Reservation dropped by a shutdown
            None => return Err(RcError::Draining),
        };

        let (handle, task_handle) = RoomActor::spawn(
            room_id,
            host_id,
            network,
            self.cancel_token.child_token(),
            self.self_sender.clone(),
            Arc::clone(&self.services),
        );

        self.rooms.insert(
            room_id,
            RoomEntry::Active(ManagedRoom {
                handle: handle.clone(),
                task_handle,
            }),
        );

        metrics::record_room_created();
        metrics::set_active_rooms(self.active_count());

        info!(
            target: "rc.actor.controller",
            room_id = %room_id,
            host_id = %host_id,
            total_rooms = self.active_count(),
            "Room created"
        );

        Ok(handle)
    }

    fn abort(&mut self, room_id: RoomId) {
        if matches!(self.rooms.get(&room_id), Some(RoomEntry::Reserved { .. })) {
            self.rooms.remove(&room_id);
            debug!(
                target: "rc.actor.controller",
                room_id = %room_id,
                "Room reservation aborted"
            );
        }
    }

    fn get(&self, room_id: RoomId) -> Result<RoomActorHandle, RcError> {
        match self.rooms.get(&room_id) {
            Some(RoomEntry::Active(managed)) => Ok(managed.handle.clone()),
            _ => Err(RcError::RoomNotFound("Room not found".to_string())),
        }
    }

    fn remove(&mut self, room_id: RoomId) -> Result<(), RcError> {
        match self.rooms.get(&room_id) {
            Some(RoomEntry::Active(_)) => {
                // The room's own task is exiting; dropping the JoinHandle detaches it
                self.rooms.remove(&room_id);
                metrics::set_active_rooms(self.active_count());

                info!(
                    target: "rc.actor.controller",
                    room_id = %room_id,
                    total_rooms = self.active_count(),
                    "Room removed"
                );
                Ok(())
            }
            _ => Err(RcError::RoomNotFound("Room not found".to_string())),
        }
    }

    fn list(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .filter_map(|(room_id, entry)| match entry {
                RoomEntry::Active(managed) => Some(RoomSummary {
                    room_id: *room_id,
                    member_count: managed.handle.member_count(),
                }),
                RoomEntry::Reserved { .. } => None,
            })
            .collect();
        rooms.sort_by_key(|summary| summary.room_id);
        rooms
    }

    fn get_status(&self) -> ControllerStatus {
        let active_rooms = self.active_count();
        ControllerStatus {
            active_rooms,
            pending_rooms: self.rooms.len() - active_rooms,
            is_draining: !self.accepting_new,
        }
    }

    fn active_count(&self) -> usize {
        self.rooms
            .values()
            .filter(|entry| matches!(entry, RoomEntry::Active(_)))
            .count()
    }

    /// Cancel every room and wait for it to stop its network.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.controller",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();

        let deadline = self.services.stop_grace_period + ROOM_SHUTDOWN_SLACK;
        for (room_id, entry) in self.rooms.drain() {
            let RoomEntry::Active(managed) = entry else {
                continue;
            };
            match tokio::time::timeout(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        metrics::set_active_rooms(0);
        info!(target: "rc.actor.controller", "Graceful shutdown complete");
    }

    /// Reap room actors that exited while still registered.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter_map(|(room_id, entry)| match entry {
                RoomEntry::Active(managed) if managed.task_handle.is_finished() => Some(*room_id),
                _ => None,
            })
            .collect();

        for room_id in finished {
            let Some(RoomEntry::Active(managed)) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor exited while still registered"
                    );
                }
                Err(join_error) => {
                    error!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                }
            }

            // The network may still be supervised; stopping is idempotent
            let services = Arc::clone(&self.services);
            let network = managed.handle.network().clone();
            tokio::spawn(async move {
                services
                    .network
                    .stop_network(&network, services.stop_grace_period)
                    .await;
            });

            metrics::record_room_destroyed();
            metrics::set_active_rooms(self.active_count());
        }
    }
}
