//! Room manager: creates rooms, finds them by id, and drains them on
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use lockstep_protocol::{PlayerId, RoomId};
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::room::{NewRoom, build_room};
use crate::{RoomConfig, RoomError, RoomHandle};

type Registry = Arc<RwLock<HashMap<RoomId, RoomHandle>>>;

/// Registry of live rooms.
///
/// Share it behind an `Arc`. The registry lock is only held to insert,
/// look up, remove, or list rooms; never while a room runs.
#[derive(Debug)]
pub struct RoomManager {
    config: RoomConfig,
    rooms: Registry,
    closed: AtomicBool,
}

impl RoomManager {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Creates a room and starts its actor.
    ///
    /// The duplicate check, registration, and spawn happen under one write
    /// lock, so two concurrent creates of the same id cannot both succeed.
    ///
    /// # Errors
    /// - `RoomError::DuplicateId` if a live room already has `id`.
    /// - `RoomError::ShuttingDown` once [`stop`](Self::stop) has run.
    pub async fn create_room(
        &self,
        id: RoomId,
        type_tag: i32,
        players: Vec<PlayerId>,
        seed: i64,
        logic_tag: impl Into<String>,
    ) -> Result<RoomHandle, RoomError> {
        let mut rooms = self.rooms.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RoomError::ShuttingDown);
        }
        if rooms.contains_key(&id) {
            warn!(room_id = %id, "room id already in use");
            return Err(RoomError::DuplicateId(id));
        }

        let players_len = players.len();
        let (handle, actor, exited) = build_room(
            NewRoom {
                id,
                type_tag,
                players,
                seed,
                logic_tag: logic_tag.into(),
            },
            self.config.clone(),
        );
        rooms.insert(id, handle.clone());
        tokio::spawn(supervise(id, actor.run(), Arc::clone(&self.rooms), exited));

        info!(room_id = %id, type_tag, players = players_len, "room created");
        Ok(handle)
    }

    pub async fn get_room(&self, id: RoomId) -> Option<RoomHandle> {
        self.rooms.read().await.get(&id).cloned()
    }

    /// Number of live rooms.
    pub async fn room_num(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Ids of all live rooms, ascending.
    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Force-stops one room and waits for it to exit.
    ///
    /// # Errors
    /// `RoomError::NotFound` if no live room has `id`.
    pub async fn stop_room(&self, id: RoomId) -> Result<(), RoomError> {
        let handle = self.get_room(id).await.ok_or(RoomError::NotFound(id))?;
        handle.stop().await;
        Ok(())
    }

    /// Stops every room and waits until all of them have exited and left
    /// the registry. Later creates fail with `ShuttingDown`.
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        let handles: Vec<RoomHandle> = {
            let rooms = self.rooms.write().await;
            self.closed.store(true, Ordering::Release);
            rooms.values().cloned().collect()
        };
        info!(rooms = handles.len(), "stopping all rooms");
        join_all(handles.iter().map(|room| room.stop())).await;
        info!("all rooms stopped");
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

/// Runs one room's actor in its own task so a panic stays contained, then
/// deregisters the room and announces its exit.
async fn supervise(
    room_id: RoomId,
    actor: impl Future<Output = ()> + Send + 'static,
    rooms: Registry,
    exited: watch::Sender<bool>,
) {
    if let Err(err) = tokio::spawn(actor).await {
        if err.is_panic() {
            error!(%room_id, "room actor panicked");
        } else {
            warn!(%room_id, "room actor cancelled");
        }
    }
    rooms.write().await.remove(&room_id);
    exited.send_replace(true);
    debug!(%room_id, "room deregistered");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn crash() {
        panic!("room blew up");
    }

    #[tokio::test]
    async fn test_panicking_room_is_deregistered_and_exits() {
        let (handle, _actor, exited) = build_room(
            NewRoom {
                id: RoomId(7),
                type_tag: 0,
                players: vec![PlayerId(1)],
                seed: 0,
                logic_tag: String::new(),
            },
            RoomConfig::default(),
        );
        let rooms: Registry = Arc::new(RwLock::new(HashMap::from([(RoomId(7), handle.clone())])));

        supervise(RoomId(7), crash(), Arc::clone(&rooms), exited).await;

        assert!(rooms.read().await.is_empty());
        assert!(handle.has_exited());
        handle.wait_exited().await;
    }
}
