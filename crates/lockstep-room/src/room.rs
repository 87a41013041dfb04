//! Room actor: one Tokio task per battle that owns its [`Game`].
//!
//! Nothing outside the actor touches the game. The rest of the server talks
//! to it through a [`RoomHandle`], which wraps three bounded queues
//! (connections, messages, closes) and a stop signal. A full queue makes
//! the producer wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use lockstep_protocol::{Packet, PlayerId, RoomId};
use lockstep_session::ConnectionHandle;
use lockstep_tick::TickScheduler;
use lockstep_transport::ConnectionId;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::game::unix_now;
use crate::{Game, GameEvent, RoomConfig};

/// A connection that went away, as reported by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Disconnect {
    conn_id: ConnectionId,
    player: Option<PlayerId>,
}

/// Immutable facts about a room plus the two flags the actor publishes.
#[derive(Debug)]
struct RoomInfo {
    id: RoomId,
    type_tag: i32,
    logic_tag: String,
    players: Vec<PlayerId>,
    seed: i64,
    timestamp: i64,
    secret_key: String,
    over: AtomicBool,
    result: OnceLock<HashMap<PlayerId, u64>>,
}

/// Handle to a running room.
///
/// Cheap to clone. The manager keeps one in its registry; the router
/// clones it per connection.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    info: Arc<RoomInfo>,
    connect_tx: mpsc::Sender<ConnectionHandle>,
    message_tx: mpsc::Sender<(PlayerId, Packet)>,
    disconnect_tx: mpsc::Sender<Disconnect>,
    stop_tx: Arc<watch::Sender<bool>>,
    exited_rx: watch::Receiver<bool>,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.info.id
    }

    /// Key clients present as their connect token.
    pub fn secret_key(&self) -> &str {
        &self.info.secret_key
    }

    /// Creation time, unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.info.timestamp
    }

    /// `true` once the battle has ended. New connects are refused from
    /// then on.
    pub fn is_over(&self) -> bool {
        self.info.over.load(Ordering::Acquire)
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.info.players.contains(&player)
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.info.players
    }

    pub fn type_tag(&self) -> i32 {
        self.info.type_tag
    }

    /// Which logic server created the room.
    pub fn logic_tag(&self) -> &str {
        &self.info.logic_tag
    }

    pub fn seed(&self) -> i64 {
        self.info.seed
    }

    /// Reported results, available once the battle is over.
    pub fn result(&self) -> Option<&HashMap<PlayerId, u64>> {
        self.info.result.get()
    }

    /// Hands an admitted connection to the room.
    ///
    /// Returns `false` if the room has already exited; the connection is
    /// closed in that case.
    pub async fn on_connect(&self, conn: ConnectionHandle) -> bool {
        match self.connect_tx.send(conn).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(conn)) => {
                debug!(room_id = %self.id(), conn_id = %conn.id(), "room gone, closing connection");
                conn.close();
                false
            }
        }
    }

    /// Queues a packet from `player`. Returns `false` if the room has
    /// exited.
    pub async fn on_message(&self, player: PlayerId, packet: Packet) -> bool {
        self.message_tx.send((player, packet)).await.is_ok()
    }

    /// Reports that a connection closed. `player` is the identity it was
    /// tagged with, if it got that far.
    pub async fn on_close(&self, conn_id: ConnectionId, player: Option<PlayerId>) {
        let _ = self
            .disconnect_tx
            .send(Disconnect { conn_id, player })
            .await;
    }

    /// Stops the room without a graceful close and waits until its actor
    /// has exited and left the registry. Safe to call any number of times
    /// from anywhere.
    pub async fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!(room_id = %self.id(), "room stop requested");
        }
        self.wait_exited().await;
    }

    /// Waits until the room's actor has exited and been deregistered.
    pub async fn wait_exited(&self) {
        let mut exited = self.exited_rx.clone();
        loop {
            let done = *exited.borrow_and_update();
            if done || exited.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        *self.exited_rx.borrow()
    }
}

/// Everything needed to create a room.
#[derive(Debug, Clone)]
pub(crate) struct NewRoom {
    pub id: RoomId,
    pub type_tag: i32,
    pub players: Vec<PlayerId>,
    pub seed: i64,
    pub logic_tag: String,
}

/// The actor half of a room. Consumed by [`RoomActor::run`].
pub(crate) struct RoomActor {
    info: Arc<RoomInfo>,
    config: RoomConfig,
    game: Game,
    connect_rx: mpsc::Receiver<ConnectionHandle>,
    message_rx: mpsc::Receiver<(PlayerId, Packet)>,
    disconnect_rx: mpsc::Receiver<Disconnect>,
    stop_rx: watch::Receiver<bool>,
}

/// Builds a room. The caller spawns the actor and flips the returned
/// sender to `true` once the actor is gone.
pub(crate) fn build_room(
    new: NewRoom,
    config: RoomConfig,
) -> (RoomHandle, RoomActor, watch::Sender<bool>) {
    let game = Game::new(new.id, &new.players, new.seed, config.game.clone(), now());

    let info = Arc::new(RoomInfo {
        id: new.id,
        type_tag: new.type_tag,
        logic_tag: new.logic_tag,
        players: new.players,
        seed: new.seed,
        timestamp: unix_now(),
        secret_key: generate_secret_key(),
        over: AtomicBool::new(false),
        result: OnceLock::new(),
    });

    let (connect_tx, connect_rx) = mpsc::channel(config.connect_queue.max(1));
    let (message_tx, message_rx) = mpsc::channel(config.message_queue.max(1));
    let (disconnect_tx, disconnect_rx) = mpsc::channel(config.disconnect_queue.max(1));
    let (stop_tx, stop_rx) = watch::channel(false);
    let (exited_tx, exited_rx) = watch::channel(false);

    let handle = RoomHandle {
        info: Arc::clone(&info),
        connect_tx,
        message_tx,
        disconnect_tx,
        stop_tx: Arc::new(stop_tx),
        exited_rx,
    };
    let actor = RoomActor {
        info,
        config,
        game,
        connect_rx,
        message_rx,
        disconnect_rx,
        stop_rx,
    };
    (handle, actor, exited_tx)
}

impl RoomActor {
    /// Runs the event loop until the game stops, the room times out, or a
    /// stop is requested.
    pub(crate) async fn run(mut self) {
        let room_id = self.info.id;
        info!(%room_id, players = self.info.players.len(), "room running");

        let mut ticker = TickScheduler::new(self.config.tick.clone());
        let inactivity = time::sleep(self.config.inactivity_timeout);
        tokio::pin!(inactivity);

        let graceful = loop {
            tokio::select! {
                _ = self.stop_rx.changed() => {
                    warn!(%room_id, "room force stopped");
                    break false;
                }
                () = &mut inactivity => {
                    warn!(%room_id, "room timed out");
                    break true;
                }
                Some((player, packet)) = self.message_rx.recv() => {
                    self.game.process_msg(player, &packet, now());
                    self.drain_events();
                }
                _ = ticker.wait_for_tick() => {
                    let running = self.game.tick(now());
                    self.drain_events();
                    ticker.record_tick_end();
                    if !running {
                        info!(%room_id, "game stopped");
                        break true;
                    }
                }
                Some(conn) = self.connect_rx.recv() => self.handle_connect(conn),
                Some(closed) = self.disconnect_rx.recv() => self.handle_disconnect(closed),
            }
        };

        if graceful {
            self.game.close();
            tokio::select! {
                () = time::sleep(self.config.close_grace) => {}
                _ = self.stop_rx.changed() => {}
            }
        }
        self.game.cleanup();

        let lifetime = unix_now() - self.info.timestamp;
        info!(%room_id, lifetime_secs = lifetime, "room exited");
    }

    fn handle_connect(&mut self, conn: ConnectionHandle) {
        let room_id = self.info.id;
        let Some(player) = conn.player() else {
            error!(%room_id, conn_id = %conn.id(), "connection without identity, closing");
            conn.close();
            return;
        };
        let conn_id = conn.id();
        if self.game.join_game(player, conn, now()) {
            info!(%room_id, player_id = %player, %conn_id, "player joined room");
        } else {
            error!(%room_id, player_id = %player, %conn_id, "player join refused");
        }
        self.drain_events();
    }

    fn handle_disconnect(&mut self, closed: Disconnect) {
        match closed.player {
            Some(player) => {
                self.game.leave_game(player, closed.conn_id);
                self.drain_events();
            }
            None => {
                warn!(room_id = %self.info.id, conn_id = %closed.conn_id, "close without identity");
            }
        }
    }

    fn drain_events(&mut self) {
        let room_id = self.info.id;
        for event in self.game.take_events() {
            match event {
                GameEvent::Joined(player) => {
                    debug!(%room_id, player_id = %player, "player online");
                }
                GameEvent::Started => {
                    info!(%room_id, "battle started");
                }
                GameEvent::Left(player) => {
                    info!(%room_id, player_id = %player, "player left");
                }
                GameEvent::Over { results } => {
                    info!(%room_id, results = results.len(), "battle over");
                    let _ = self.info.result.set(results);
                    self.info.over.store(true, Ordering::Release);
                }
            }
        }
    }
}

/// Tokio's clock as a std instant, so paused-time tests move game time too.
fn now() -> Instant {
    time::Instant::now().into_std()
}

/// 32 lowercase hex characters from 16 random bytes.
fn generate_secret_key() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
