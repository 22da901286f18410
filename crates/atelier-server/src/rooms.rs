//! Rooms and the peer-to-room index.
//!
//! The manager owns all membership state; peers never mutate it. A peer's
//! room is always a lookup through the index, never a reference the peer
//! holds itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use atelier_shared::types::{PeerId, RoomId};

use crate::error::BrokerError;
use crate::peer::Peer;

/// One host plus guests in join order. Lives exactly as long as the
/// host's channel.
pub struct Room {
    pub id: RoomId,
    host: Arc<Peer>,
    guests: RwLock<Vec<Arc<Peer>>>,
}

impl Room {
    fn new(id: RoomId, host: Arc<Peer>) -> Self {
        Self {
            id,
            host,
            guests: RwLock::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &Arc<Peer> {
        &self.host
    }

    pub async fn guests(&self) -> Vec<Arc<Peer>> {
        self.guests.read().await.clone()
    }

    /// Ordered union: host first, then guests in join order.
    pub async fn peers(&self) -> Vec<Arc<Peer>> {
        let guests = self.guests.read().await;
        let mut peers = Vec::with_capacity(1 + guests.len());
        peers.push(Arc::clone(&self.host));
        peers.extend(guests.iter().cloned());
        peers
    }
}

#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    peer_index: RwLock<HashMap<PeerId, Arc<Room>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new room with `host` as its only member.
    pub async fn install(&self, id: RoomId, host: Arc<Peer>) -> Result<Arc<Room>, BrokerError> {
        let room = {
            let mut rooms = self.rooms.write().await;
            if rooms.contains_key(&id) {
                return Err(BrokerError::RoomActive(id));
            }
            let room = Arc::new(Room::new(id.clone(), Arc::clone(&host)));
            rooms.insert(id.clone(), Arc::clone(&room));
            room
        };
        self.peer_index
            .write()
            .await
            .insert(host.id, Arc::clone(&room));

        info!(room = %id, host = %host.id, "room created");
        Ok(room)
    }

    /// Append `peer` to an existing room's guest list.
    pub async fn add_guest(&self, id: &RoomId, peer: Arc<Peer>) -> Result<Arc<Room>, BrokerError> {
        let room = self
            .room_by_id(id)
            .await
            .ok_or_else(|| BrokerError::RoomNotFound(id.clone()))?;

        room.guests.write().await.push(Arc::clone(&peer));
        self.peer_index
            .write()
            .await
            .insert(peer.id, Arc::clone(&room));

        info!(room = %id, peer = %peer.id, "guest joined");
        Ok(room)
    }

    /// Drop one peer from the index and its room's guest list.
    ///
    /// Returns the room the peer belonged to, or `None` when the peer was
    /// already removed.
    pub async fn remove_peer(&self, peer_id: PeerId) -> Option<Arc<Room>> {
        let room = self.unindex_peer(peer_id).await?;
        room.guests.write().await.retain(|g| g.id != peer_id);
        Some(room)
    }

    /// Drop a peer from the index without touching the guest list; room
    /// teardown walks a captured member snapshot instead.
    pub async fn unindex_peer(&self, peer_id: PeerId) -> Option<Arc<Room>> {
        self.peer_index.write().await.remove(&peer_id)
    }

    /// Remove the room entry itself. Members stay indexed until removed
    /// individually; teardown order is the broker's concern.
    pub async fn remove_room(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.write().await.remove(id)
    }

    pub async fn room_by_id(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn room_for_peer(&self, peer_id: PeerId) -> Option<Arc<Room>> {
        self.peer_index.read().await.get(&peer_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn indexed_peer_count(&self) -> usize {
        self.peer_index.read().await.len()
    }
}
