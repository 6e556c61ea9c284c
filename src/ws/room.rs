//! Room actor: a single control loop owns membership, the stage, and all
//! fan-out for one room. External callers never touch room state directly;
//! they send commands through the room's input queue, which totally orders
//! register/unregister/broadcast/set-stage events per room.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::hub::Hub;
use super::types::{Envelope, StageGrid};

/// Size of a room's command queue.
const ROOM_COMMAND_BUFFER: usize = 256;

/// A member as the room sees it: an identity plus the sending half of the
/// member's outbound queue. The room holds the only sender; dropping it
/// closes the queue and tells the member's write loop to drain and stop.
pub struct Member {
    pub id: String,
    pub sender: mpsc::Sender<String>,
}

enum RoomCommand {
    Register(Member),
    Unregister { client_id: String },
    Broadcast(String),
    SetStage(StageGrid),
    Shutdown,
}

/// Counters readable from any task without touching the control loop.
/// Only the control loop (and the hub, under its map lock) writes them.
struct RoomCounters {
    members: AtomicUsize,
    /// Registrations handed out by `Hub::get_or_create` that have not yet
    /// been processed by the control loop. Non-zero blocks room removal.
    pending: AtomicUsize,
}

/// Cloneable handle used by connections and the hub to reach a room.
#[derive(Clone)]
pub struct RoomHandle {
    id: Arc<str>,
    tx: mpsc::Sender<RoomCommand>,
    counters: Arc<RoomCounters>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current membership count.
    pub fn member_count(&self) -> usize {
        self.counters.members.load(Ordering::Acquire)
    }

    /// Add a member. Must be called exactly once per `Hub::get_or_create`,
    /// which has already recorded the registration intent.
    pub async fn register(&self, member: Member) {
        let client_id = member.id.clone();
        if self.tx.send(RoomCommand::Register(member)).await.is_err() {
            // The loop is gone; release the intent so the hub is not wedged.
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("room {}: dropping registration of {client_id}, room closed", self.id);
        }
    }

    /// Remove a member. Idempotent; unknown identities are ignored by the loop.
    pub async fn unregister(&self, client_id: &str) {
        let command = RoomCommand::Unregister {
            client_id: client_id.to_string(),
        };
        if self.tx.send(command).await.is_err() {
            debug!("room {}: unregister of {client_id} after close", self.id);
        }
    }

    /// Relay an encoded envelope to every member.
    pub async fn broadcast(&self, payload: String) {
        if self.tx.send(RoomCommand::Broadcast(payload)).await.is_err() {
            debug!("room {}: broadcast dropped, room closed", self.id);
        }
    }

    /// Replace the shared stage value.
    pub async fn set_stage(&self, grid: StageGrid) {
        if self.tx.send(RoomCommand::SetStage(grid)).await.is_err() {
            debug!("room {}: stage update dropped, room closed", self.id);
        }
    }

    /// Ask the control loop to close every member queue and exit.
    pub(crate) async fn close(&self) {
        let _ = self.tx.send(RoomCommand::Shutdown).await;
    }

    /// Record a registration intent. Called by the hub while it holds the
    /// map entry, so removal cannot interleave.
    pub(crate) fn begin_register(&self) {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// True when the room has no members and no registration in flight.
    /// Only meaningful under the hub's map lock.
    pub(crate) fn is_idle(&self) -> bool {
        self.counters.members.load(Ordering::SeqCst) == 0
            && self.counters.pending.load(Ordering::SeqCst) == 0
    }
}

/// State owned by the control loop.
pub(crate) struct Room {
    id: String,
    members: HashMap<String, mpsc::Sender<String>>,
    stage: StageGrid,
    counters: Arc<RoomCounters>,
}

impl Room {
    /// Create a room and start its control loop. Called by the hub with the
    /// map entry held, so the first registration cannot race removal.
    pub(crate) fn spawn(id: String, hub: Hub) -> RoomHandle {
        let (tx, rx) = mpsc::channel(ROOM_COMMAND_BUFFER);
        let counters = Arc::new(RoomCounters {
            members: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        });
        let room = Room {
            id: id.clone(),
            members: HashMap::new(),
            stage: StageGrid::new(),
            counters: counters.clone(),
        };
        tokio::spawn(room.run(rx, hub));
        RoomHandle {
            id: id.into(),
            tx,
            counters,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>, hub: Hub) {
        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Register(member) => self.handle_register(member),
                RoomCommand::Unregister { client_id } => {
                    self.handle_unregister(&client_id);
                    if self.members.is_empty() && hub.remove_if_idle(&self.id) {
                        info!("Room {} removed (empty)", self.id);
                        return;
                    }
                }
                RoomCommand::Broadcast(payload) => self.fan_out(&payload),
                RoomCommand::SetStage(grid) => {
                    self.stage = grid;
                    debug!("Stage updated for room {} with {} layers", self.id, self.stage.len());
                }
                RoomCommand::Shutdown => {
                    self.members.clear();
                    self.counters.members.store(0, Ordering::SeqCst);
                    info!("Room {} closed by hub shutdown", self.id);
                    return;
                }
            }
        }
    }

    fn handle_register(&mut self, member: Member) {
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        self.members.insert(member.id.clone(), member.sender);
        self.counters.members.store(self.members.len(), Ordering::SeqCst);
        info!(
            "Client {} connected to room {}. Total clients: {}",
            member.id,
            self.id,
            self.members.len()
        );

        // Hand the joiner the authoritative stage through the normal fan-out
        // path; it reaches every member and is the joiner's first message.
        match Envelope::stage(&self.stage) {
            Ok(payload) => self.fan_out(&payload),
            Err(err) => warn!("room {}: encoding stage snapshot failed: {err}", self.id),
        }
    }

    fn handle_unregister(&mut self, client_id: &str) {
        if self.members.remove(client_id).is_some() {
            // Dropping the sender closed the member's outbound queue.
            self.counters.members.store(self.members.len(), Ordering::SeqCst);
        }
        info!(
            "Client {client_id} disconnected from room {}. Total clients: {}",
            self.id,
            self.members.len()
        );

        match Envelope::client_left(client_id) {
            Ok(payload) => self.fan_out(&payload),
            Err(err) => warn!("room {}: encoding client_left failed: {err}", self.id),
        }
    }

    /// Deliver `payload` to every member's outbound queue. Delivery is a
    /// try-send: a member whose queue is full cannot keep up and is evicted
    /// inline, without blocking the others.
    fn fan_out(&mut self, payload: &str) {
        let mut evicted = Vec::new();
        for (client_id, sender) in &self.members {
            match sender.try_send(payload.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Client {client_id} too slow for room {}, evicting",
                        self.id
                    );
                    evicted.push(client_id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push(client_id.clone());
                }
            }
        }
        if !evicted.is_empty() {
            for client_id in evicted {
                self.members.remove(&client_id);
            }
            self.counters.members.store(self.members.len(), Ordering::SeqCst);
        }
    }
}
