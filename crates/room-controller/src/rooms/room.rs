//! `RoomActor` - one actor per room.
//!
//! The actor owns the room's ordered member list and its network handle.
//! Every membership mutation runs inside the actor, one message at a time.
//!
//! When the last member leaves, the actor moves to `Stopping`, asks the
//! controller to drop the room from the registry, stops the network, and only
//! then answers the leave. Messages still queued at that point are answered
//! with `RoomNotFound`.

use super::messages::{ControllerMessage, JoinView, LeaveView, RoomMessage};
use super::{remove_member_dir, RoomServices};
use crate::errors::RcError;
use crate::network::{LifecycleState, NetworkHandle};
use crate::observability::metrics;
use common::types::{RoomId, UserId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for a room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    host_id: UserId,
    network: NetworkHandle,
    member_count: Arc<AtomicUsize>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn host_id(&self) -> UserId {
        self.host_id
    }

    /// Network the room was created with.
    #[must_use]
    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    /// Current member count without a round trip through the mailbox.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::SeqCst)
    }

    /// Add `member_id` to the room and issue its credential.
    pub async fn join(&self, member_id: UserId) -> Result<JoinView, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            member_id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| room_gone())?
    }

    /// Remove `member_id` from the room.
    pub async fn leave(&self, member_id: UserId) -> Result<LeaveView, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Leave {
            member_id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| room_gone())?
    }

    /// Current members in join order.
    pub async fn members(&self) -> Result<Vec<UserId>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Members { respond_to: tx }).await?;
        rx.await.map_err(|_| room_gone())?
    }

    /// Cancel the actor. Its network is stopped on the way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RcError> {
        // A closed mailbox means the room already tore itself down
        self.sender.send(message).await.map_err(|_| room_gone())
    }
}

fn room_gone() -> RcError {
    RcError::RoomNotFound("Room not found".to_string())
}

/// Whether the run loop keeps going after a message.
enum Flow {
    Continue,
    Exit,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    host_id: UserId,
    members: Vec<UserId>,
    state: LifecycleState,
    network: Option<NetworkHandle>,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    controller: mpsc::WeakSender<ControllerMessage>,
    services: Arc<RoomServices>,
    member_count: Arc<AtomicUsize>,
}

impl RoomActor {
    /// Spawn an actor for a room whose network is already running.
    ///
    /// The host is the first member. `controller` is used once, to remove
    /// the room from the registry when it empties.
    pub fn spawn(
        room_id: RoomId,
        host_id: UserId,
        network: NetworkHandle,
        cancel_token: CancellationToken,
        controller: mpsc::WeakSender<ControllerMessage>,
        services: Arc<RoomServices>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let member_count = Arc::new(AtomicUsize::new(1));

        let actor = Self {
            room_id,
            host_id,
            members: vec![host_id],
            state: LifecycleState::Active,
            network: Some(network.clone()),
            receiver,
            cancel_token: cancel_token.clone(),
            controller,
            services,
            member_count: Arc::clone(&member_count),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            host_id,
            network,
            member_count,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            host_id = %self.host_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.stop_network().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        // All handles dropped
                        self.stop_network().await;
                        break;
                    };
                    if let Flow::Exit = self.handle_message(message).await {
                        break;
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            members_remaining = self.members.len(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) -> Flow {
        match message {
            RoomMessage::Join {
                member_id,
                respond_to,
            } => {
                let result = self.join(member_id).await;
                match &result {
                    Ok(_) => metrics::record_room_join("success"),
                    Err(e) => metrics::record_room_join(e.code()),
                }
                let _ = respond_to.send(result);
                Flow::Continue
            }

            RoomMessage::Leave {
                member_id,
                respond_to,
            } => {
                let result = self.leave(member_id).await;
                let _ = respond_to.send(result);
                if self.state == LifecycleState::Terminated {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            }

            RoomMessage::Members { respond_to } => {
                let result = if self.state == LifecycleState::Active {
                    Ok(self.members.clone())
                } else {
                    Err(room_gone())
                };
                let _ = respond_to.send(result);
                Flow::Continue
            }
        }
    }

    async fn join(&mut self, member_id: UserId) -> Result<JoinView, RcError> {
        let network = match (&self.state, &self.network) {
            (LifecycleState::Active, Some(network)) => network.clone(),
            _ => return Err(room_gone()),
        };

        if self.members.contains(&member_id) {
            return Err(RcError::AlreadyMember(
                "User is already a member of this room".to_string(),
            ));
        }

        // Published only once issuance succeeded, so readers never count
        // a member whose join may still roll back
        self.members.push(member_id);

        match self
            .services
            .provision_member(self.room_id, member_id, &network)
            .await
        {
            Ok(client_config) => {
                self.publish_count();
                info!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    member_id = %member_id,
                    member_count = self.members.len(),
                    "Member joined"
                );
                Ok(JoinView {
                    room_id: self.room_id,
                    members: self.members.clone(),
                    client_config,
                })
            }
            Err(e) => {
                self.members.retain(|m| *m != member_id);
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    member_id = %member_id,
                    error = %e,
                    "Join rolled back"
                );
                Err(e)
            }
        }
    }

    async fn leave(&mut self, member_id: UserId) -> Result<LeaveView, RcError> {
        if self.state != LifecycleState::Active {
            return Err(room_gone());
        }

        let Some(position) = self.members.iter().position(|m| *m == member_id) else {
            return Err(RcError::NotAMember(
                "User is not a member of this room".to_string(),
            ));
        };

        self.members.remove(position);
        // An emptied room publishes its count only after leaving the registry
        if !self.members.is_empty() {
            self.publish_count();
        }

        if let Some(network) = &self.network {
            remove_member_dir(&network.member_dir(member_id)).await;
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            member_id = %member_id,
            member_count = self.members.len(),
            "Member left"
        );

        if self.members.is_empty() {
            self.teardown().await;
        }

        Ok(LeaveView {
            room_id: self.room_id,
            members: self.members.clone(),
        })
    }

    /// Destroy the emptied room: leave the registry, then stop the network.
    async fn teardown(&mut self) {
        self.state = LifecycleState::Stopping;

        // The controller cancels rooms before waiting on them at shutdown
        tokio::select! {
            result = self.request_removal() => {
                if let Err(e) = result {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        error = %e,
                        "Room was not in the registry"
                    );
                }
            }
            () = self.cancel_token.cancelled() => {}
        }
        self.publish_count();

        self.stop_network().await;
        metrics::record_room_destroyed();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "Room destroyed"
        );
    }

    async fn request_removal(&self) -> Result<(), RcError> {
        let Some(controller) = self.controller.upgrade() else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        controller
            .send(ControllerMessage::Remove {
                room_id: self.room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    async fn stop_network(&mut self) {
        self.state = LifecycleState::Stopping;
        if let Some(network) = self.network.take() {
            self.services
                .network
                .stop_network(&network, self.services.stop_grace_period)
                .await;
        }
        self.state = LifecycleState::Terminated;
    }

    fn publish_count(&self) {
        self.member_count.store(self.members.len(), Ordering::SeqCst);
    }
}
