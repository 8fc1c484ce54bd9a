use crate::hub::Hub;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry of live per-room hubs, keyed by room id.
///
/// Cheap to clone: the inner map lives behind an `Arc<RwLock<_>>`, so every
/// clone (including the one each `Hub`'s event-loop task holds for eviction)
/// refers to the same registry.
#[derive(Clone)]
pub struct HubManager {
    rooms: Arc<RwLock<HashMap<String, Arc<Hub>>>>,
}

impl Default for HubManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HubManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the hub for `room_id`, spawning one if this is the first
    /// client to reach it. Lock-free on the common (already-exists) path;
    /// double-checks under the write lock so a race between two callers
    /// creating the same room can't spawn two event loops.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Hub> {
        if let Some(hub) = self.rooms.read().await.get(room_id) {
            return hub.clone();
        }

        let mut rooms = self.rooms.write().await;
        if let Some(hub) = rooms.get(room_id) {
            return hub.clone();
        }

        debug!(room_id, "spawning new hub");
        let hub = Hub::spawn(room_id.to_string(), self.clone());
        rooms.insert(room_id.to_string(), hub.clone());
        hub
    }

    /// Drop a room's hub from the registry. Called by a hub's own
    /// event-loop task once its last client has left; safe to call
    /// redundantly (e.g. if a new client raced the eviction and a fresh
    /// hub was already inserted under the same id).
    pub(crate) async fn evict(&self, room_id: &str) {
        self.rooms.write().await.remove(room_id);
        debug!(room_id, "hub evicted");
    }

    /// Number of rooms currently live. Exposed for diagnostics/tests.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
