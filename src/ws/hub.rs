//! Room registry: lazily creates rooms on first reference and removes them
//! when their last member leaves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use log::{debug, info};

use super::room::{Room, RoomHandle};

/// Registry of live rooms. Cheap to clone; all clones share one map.
///
/// Check-and-create and removal both run under the map's entry lock, so at
/// most one room ever exists per identifier and a room deciding "I am empty,
/// remove me" cannot race a new joiner being handed the same instance.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    rooms: DashMap<String, RoomHandle>,
    shutting_down: AtomicBool,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: DashMap::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Return the room for `room_id`, creating it and starting its control
    /// loop on first reference. Records a registration intent under the map
    /// lock; the caller must follow up with exactly one `register`.
    pub fn get_or_create(&self, room_id: &str) -> RoomHandle {
        let entry = self
            .inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("Created room {room_id}");
                Room::spawn(room_id.to_string(), self.clone())
            });
        entry.value().begin_register();
        entry.value().clone()
    }

    /// Remove `room_id` if it has no members and no registration in flight.
    /// Called only by the room's own control loop at the moment its
    /// membership drops to zero; the re-check under the map lock closes the
    /// race with a concurrent `get_or_create`.
    pub(crate) fn remove_if_idle(&self, room_id: &str) -> bool {
        self.inner
            .rooms
            .remove_if(room_id, |_, handle| handle.is_idle())
            .is_some()
    }

    /// Total members across all rooms. An approximate snapshot; rooms are
    /// read one at a time.
    pub fn client_count(&self) -> usize {
        self.inner
            .rooms
            .iter()
            .map(|entry| entry.value().member_count())
            .sum()
    }

    /// Per-room member counts, for the stats surface.
    pub fn room_counts(&self) -> Vec<(String, usize)> {
        self.inner
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().member_count()))
            .collect()
    }

    /// Close every member queue in every room and terminate the room loops.
    /// Single-shot: later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Hub shutdown already in progress");
            return;
        }
        let handles: Vec<RoomHandle> = self
            .inner
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!("Shutting down hub with {} room(s)", handles.len());
        for handle in handles {
            handle.close().await;
        }
        self.inner.rooms.clear();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
