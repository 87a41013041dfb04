//! The battle state machine.
//!
//! A [`Game`] owns the frame log and every player session of one battle.
//! It is plain synchronous code: the room actor feeds it connections,
//! packets, closes, and ticks, then drains the [`GameEvent`]s it produced.
//! Every method that depends on time takes `now` explicitly.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lockstep_protocol::{
    ConnectReply, ErrorCode, FrameBatch, FrameData, InputCommand, InputRequest,
    JoinRoomReply, JsonCodec, MessageId, Packet, PlayerId, ProgressNotice,
    ProgressReport, ProtocolError, ResultReport, RoomId, StartNotice,
};
use lockstep_session::{ConnectionHandle, PlayerSession, SessionRoster};
use lockstep_transport::ConnectionId;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, trace, warn};

use crate::{GameConfig, GameState, LockstepEngine};

/// Lifecycle notifications for the owning room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Joined(PlayerId),
    Started,
    Left(PlayerId),
    /// Emitted exactly once, on the tick after the battle ended.
    Over { results: HashMap<PlayerId, u64> },
}

/// One battle.
#[derive(Debug)]
pub struct Game {
    room_id: RoomId,
    config: GameConfig,
    state: GameState,
    created_at: Instant,
    /// Unix seconds. Creation time until the battle starts, then start time.
    start_time: i64,
    seed: i64,
    engine: LockstepEngine,
    roster: SessionRoster,
    results: HashMap<PlayerId, u64>,
    /// Forces a broadcast on the next tick regardless of cadence.
    dirty: bool,
    events: Vec<GameEvent>,
}

impl Game {
    pub fn new(
        room_id: RoomId,
        players: &[PlayerId],
        seed: i64,
        config: GameConfig,
        now: Instant,
    ) -> Self {
        Self {
            room_id,
            config,
            state: GameState::Ready,
            created_at: now,
            start_time: unix_now(),
            seed,
            engine: LockstepEngine::new(),
            roster: SessionRoster::new(players, now),
            results: HashMap::new(),
            dirty: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn frame_count(&self) -> u32 {
        self.engine.frame_count()
    }

    pub fn results(&self) -> &HashMap<PlayerId, u64> {
        &self.results
    }

    pub fn session(&self, player: PlayerId) -> Option<&PlayerSession> {
        self.roster.get(player)
    }

    /// Hands over the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Binds a freshly admitted connection to `player`'s session.
    ///
    /// Returns `false` if `player` is not on the roster; the connection is
    /// closed in that case. Once the battle is over the connection is still
    /// bound, but it gets a `RoomState` reply and never becomes ready; it
    /// stays open until the room releases it.
    pub fn join_game(
        &mut self,
        player: PlayerId,
        conn: ConnectionHandle,
        now: Instant,
    ) -> bool {
        let room_id = self.room_id;
        let Some(session) = self.roster.get_mut(player) else {
            warn!(%room_id, player_id = %player, "connection for unknown player refused");
            conn.close();
            return false;
        };

        let conn_id = conn.id();
        if self.state.is_finished() {
            session.connect(conn, now);
            if let Some(reply) = connect_reply(ErrorCode::RoomState) {
                session.send(reply);
            }
            debug!(%room_id, player_id = %player, %conn_id, state = %self.state, "join after battle end");
            return true;
        }

        if let Some(evicted) = session.connect(conn, now) {
            info!(
                %room_id,
                player_id = %player,
                old = %evicted.id(),
                new = %conn_id,
                "connection replaced"
            );
        }
        if let Some(reply) = connect_reply(ErrorCode::Ok) {
            session.send(reply);
        }
        self.events.push(GameEvent::Joined(player));

        if self.state == GameState::Gaming {
            self.catch_up(player);
        }
        true
    }

    /// Releases `player`'s connection if `conn_id` is still the bound one.
    ///
    /// A close that arrives after the connection was replaced is stale and
    /// ignored. Returns `true` if the session went offline.
    pub fn leave_game(&mut self, player: PlayerId, conn_id: ConnectionId) -> bool {
        let Some(session) = self.roster.get_mut(player) else {
            return false;
        };
        if !session.disconnect(conn_id) {
            debug!(room_id = %self.room_id, player_id = %player, %conn_id, "stale close ignored");
            return false;
        }
        self.events.push(GameEvent::Left(player));
        true
    }

    /// Tells every connected player the room is closing.
    pub fn close(&mut self) {
        self.roster.broadcast(&Packet::empty(MessageId::Close));
    }

    /// Releases every connection.
    pub fn cleanup(&mut self) {
        self.roster.release_all();
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn process_msg(&mut self, player: PlayerId, packet: &Packet, now: Instant) {
        if !self.roster.contains(player) {
            warn!(room_id = %self.room_id, player_id = %player, "message from non-member");
            return;
        }
        let Some(id) = packet.message_id() else {
            warn!(
                room_id = %self.room_id,
                player_id = %player,
                id = packet.id_byte(),
                "unknown message id"
            );
            return;
        };
        trace!(room_id = %self.room_id, player_id = %player, message = %id, "message");

        match id {
            MessageId::JoinRoom => self.on_join_room(player),
            MessageId::Progress => self.on_progress(player, packet),
            MessageId::Heartbeat => self.on_heartbeat(player, now),
            MessageId::Ready => self.on_ready(player),
            MessageId::Input => self.on_input(player, packet),
            MessageId::Result => self.on_result(player, packet),
            other => {
                warn!(room_id = %self.room_id, player_id = %player, message = %other, "unexpected message");
            }
        }
    }

    fn on_join_room(&self, player: PlayerId) {
        let Some(session) = self.roster.get(player) else {
            return;
        };
        let (others, progress): (Vec<PlayerId>, Vec<i32>) = self
            .roster
            .iter()
            .filter(|s| s.id() != player)
            .map(|s| (s.id(), s.loading_progress()))
            .unzip();
        let reply = JoinRoomReply {
            seat: session.seat(),
            random_seed: self.seed,
            others,
            progress,
        };
        if let Some(packet) = encode(MessageId::JoinRoom, &reply) {
            session.send(packet);
        }
    }

    fn on_progress(&mut self, player: PlayerId, packet: &Packet) {
        if self.state > GameState::Ready {
            return;
        }
        let Some(report) = self.decode::<ProgressReport>(player, packet) else {
            return;
        };
        if let Some(session) = self.roster.get_mut(player) {
            session.set_loading_progress(report.progress);
        }
        let notice = ProgressNotice {
            player_id: player,
            progress: report.progress,
        };
        if let Some(packet) = encode(MessageId::Progress, &notice) {
            self.roster.broadcast_except(&packet, player);
        }
    }

    fn on_heartbeat(&mut self, player: PlayerId, now: Instant) {
        if let Some(session) = self.roster.get_mut(player) {
            session.send(Packet::empty(MessageId::Heartbeat));
            session.refresh_heartbeat(now);
        }
    }

    fn on_ready(&mut self, player: PlayerId) {
        match self.state {
            GameState::Ready => self.mark_ready(player),
            GameState::Gaming => {
                self.mark_ready(player);
                self.catch_up(player);
                info!(room_id = %self.room_id, player_id = %player, "player rejoined running battle");
            }
            state => {
                warn!(room_id = %self.room_id, player_id = %player, %state, "ready notice ignored");
            }
        }
    }

    fn mark_ready(&mut self, player: PlayerId) {
        if let Some(session) = self.roster.get_mut(player) {
            if session.set_ready(true) {
                session.send(Packet::empty(MessageId::Ready));
            }
        }
    }

    fn on_input(&mut self, player: PlayerId, packet: &Packet) {
        if self.state != GameState::Gaming {
            debug!(room_id = %self.room_id, player_id = %player, state = %self.state, "input outside battle ignored");
            return;
        }
        let Some(request) = self.decode::<InputRequest>(player, packet) else {
            return;
        };
        let Some(seat) = self.roster.get(player).map(PlayerSession::seat) else {
            return;
        };
        let command = InputCommand {
            player_id: player,
            sid: request.sid,
            x: request.x,
            y: request.y,
            seat,
        };
        if !self.engine.push_command(command) {
            warn!(
                room_id = %self.room_id,
                player_id = %player,
                frame = self.engine.frame_count(),
                "second input in one frame rejected"
            );
            return;
        }
        self.dirty = true;
    }

    fn on_result(&mut self, player: PlayerId, packet: &Packet) {
        let Some(report) = self.decode::<ResultReport>(player, packet) else {
            return;
        };
        self.results.insert(player, report.winner_id);
        info!(room_id = %self.room_id, player_id = %player, winner = report.winner_id, "result reported");
        if let Some(session) = self.roster.get(player) {
            session.send(Packet::empty(MessageId::Result));
        }
    }

    fn decode<T: DeserializeOwned>(&self, player: PlayerId, packet: &Packet) -> Option<T> {
        match packet.decode_body(&JsonCodec) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(room_id = %self.room_id, player_id = %player, id = packet.id_byte(), %err, "undecodable payload");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advances the state machine. Returns `false` once the game has
    /// stopped and the room should shut down.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.state {
            GameState::Ready => {
                let waited = now.saturating_duration_since(self.created_at);
                if waited < self.config.ready_timeout {
                    if self.roster.all_ready() {
                        self.start();
                    }
                } else if self.roster.online_count() > 0 {
                    warn!(room_id = %self.room_id, "ready timeout, forcing start");
                    self.start();
                } else {
                    warn!(room_id = %self.room_id, "ready timeout with nobody online");
                    self.transition(GameState::Over);
                }
                true
            }
            GameState::Gaming => {
                if self.all_results_in() {
                    info!(room_id = %self.room_id, frames = self.engine.frame_count(), "battle finished");
                    self.transition(GameState::Over);
                    return true;
                }
                if self.engine.frame_count() > self.config.max_frames {
                    warn!(room_id = %self.room_id, frames = self.engine.frame_count(), "battle hit frame limit");
                    self.transition(GameState::Over);
                    return true;
                }
                self.engine.tick();
                self.broadcast_frames(now);
                true
            }
            GameState::Over => {
                self.events.push(GameEvent::Over {
                    results: self.results.clone(),
                });
                self.transition(GameState::Stop);
                true
            }
            GameState::Stop => false,
        }
    }

    fn transition(&mut self, next: GameState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {}", self.state, next);
        debug!(room_id = %self.room_id, from = %self.state, to = %next, "state change");
        self.state = next;
    }

    fn start(&mut self) {
        self.engine.reset();
        for session in self.roster.iter_mut() {
            session.set_ready(true);
            session.set_loading_progress(100);
        }
        self.start_time = unix_now();
        if let Some(packet) = encode(
            MessageId::Start,
            &StartNotice {
                timestamp: self.start_time,
            },
        ) {
            self.roster.broadcast(&packet);
        }
        self.transition(GameState::Gaming);
        self.events.push(GameEvent::Started);
        info!(
            room_id = %self.room_id,
            online = self.roster.online_count(),
            players = self.roster.len(),
            "battle started"
        );
    }

    /// Every online player has reported a result. Vacuously true when
    /// nobody is online.
    fn all_results_in(&self) -> bool {
        self.roster
            .iter()
            .filter(|s| s.is_online())
            .all(|s| self.results.contains_key(&s.id()))
    }

    /// Replays the whole frame log to `player`, preceded by the start
    /// notice.
    fn catch_up(&mut self, player: PlayerId) {
        let start = encode(
            MessageId::Start,
            &StartNotice {
                timestamp: self.start_time,
            },
        );
        let Some(session) = self.roster.get_mut(player) else {
            return;
        };
        if let Some(packet) = start {
            session.send(packet);
        }
        session.set_send_cursor(0);
        let batches =
            send_frames(&self.engine, session, self.config.max_frames_per_message);
        debug!(
            room_id = %self.room_id,
            player_id = %player,
            frames = self.engine.frame_count(),
            batches,
            "frame log replayed"
        );
    }

    /// Streams new frames to every eligible player.
    ///
    /// Unless an input arrived since the last broadcast, nothing is sent
    /// until the slowest eligible player is `broadcast_offset_frames`
    /// behind.
    fn broadcast_frames(&mut self, now: Instant) {
        let threshold = self.config.bad_network_threshold;
        let count = self.engine.frame_count();
        let Some(slowest) = self
            .roster
            .iter()
            .filter(|s| is_eligible(s, now, threshold))
            .map(PlayerSession::send_cursor)
            .min()
        else {
            return;
        };
        if !self.dirty
            && count.saturating_sub(slowest) < self.config.broadcast_offset_frames
        {
            return;
        }

        let max = self.config.max_frames_per_message;
        for session in self.roster.iter_mut() {
            if is_eligible(session, now, threshold) {
                send_frames(&self.engine, session, max);
            }
        }
        self.dirty = false;
        trace!(room_id = %self.room_id, frames = count, "frames broadcast");
    }
}

/// Online, ready, and heard from recently.
fn is_eligible(
    session: &PlayerSession,
    now: Instant,
    threshold: std::time::Duration,
) -> bool {
    session.is_online() && session.is_ready() && !session.heartbeat_stale(now, threshold)
}

/// Sends frames `[cursor, frame_count)` to one session and moves its
/// cursor past the frames queued. Empty frames are left out except the
/// last one, so the client always learns the current frame count. Returns
/// the number of messages sent.
fn send_frames(
    engine: &LockstepEngine,
    session: &mut PlayerSession,
    max_per_message: usize,
) -> usize {
    let count = engine.frame_count();
    let mut batch = Vec::new();
    let mut sent = 0;
    for index in session.send_cursor()..count {
        let frame = engine.frame(index);
        let last = index + 1 == count;
        if frame.is_none() && !last {
            continue;
        }
        batch.push(FrameData {
            frame_id: index,
            input: frame.map(|f| f.commands().to_vec()).unwrap_or_default(),
        });
        if last || batch.len() >= max_per_message {
            if let Err(unsent) = send_batch(session, &batch, &mut sent) {
                session.set_send_cursor(unsent);
                return sent;
            }
            batch.clear();
        }
    }
    session.set_send_cursor(count);
    sent
}

/// Queues `frames` as one message, halving the batch until each part fits
/// in a packet. On failure returns the id of the first frame not queued.
fn send_batch(
    session: &PlayerSession,
    frames: &[FrameData],
    sent: &mut usize,
) -> Result<(), u32> {
    let batch = FrameBatch {
        frames: frames.to_vec(),
    };
    match Packet::message(&JsonCodec, MessageId::Frame, &batch) {
        Ok(packet) => {
            session.send(packet);
            *sent += 1;
            Ok(())
        }
        Err(ProtocolError::PayloadTooLarge { .. }) if frames.len() > 1 => {
            let (head, tail) = frames.split_at(frames.len() / 2);
            send_batch(session, head, sent)?;
            send_batch(session, tail, sent)
        }
        Err(err) => {
            let first = frames.first().map_or(0, |f| f.frame_id);
            warn!(player_id = %session.id(), frame = first, %err, "failed to build frame batch");
            Err(first)
        }
    }
}

fn connect_reply(error_code: ErrorCode) -> Option<Packet> {
    encode(MessageId::Connect, &ConnectReply { error_code })
}

fn encode<T: Serialize>(id: MessageId, value: &T) -> Option<Packet> {
    match Packet::message(&JsonCodec, id, value) {
        Ok(packet) => Some(packet),
        Err(err) => {
            warn!(message = %id, %err, "failed to build packet");
            None
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lockstep_session::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    const P1: PlayerId = PlayerId(101);
    const P2: PlayerId = PlayerId(202);

    fn new_game(now: Instant) -> Game {
        Game::new(RoomId(1), &[P1, P2], 42, GameConfig::default(), now)
    }

    fn connect(
        game: &mut Game,
        player: PlayerId,
        conn: u64,
        now: Instant,
    ) -> UnboundedReceiver<Outbound> {
        let (mut handle, rx) = ConnectionHandle::channel(ConnectionId::new(conn));
        handle.tag(player);
        assert!(game.join_game(player, handle, now));
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Packet(packet) = item {
                packets.push(packet);
            }
        }
        packets
    }

    fn only(packets: &[Packet], id: MessageId) -> Vec<Packet> {
        packets
            .iter()
            .filter(|p| p.message_id() == Some(id))
            .cloned()
            .collect()
    }

    fn body<T: DeserializeOwned>(packet: &Packet) -> T {
        packet.decode_body(&JsonCodec).unwrap()
    }

    fn msg<T: Serialize>(id: MessageId, value: &T) -> Packet {
        Packet::message(&JsonCodec, id, value).unwrap()
    }

    fn input(sid: i32) -> Packet {
        msg(MessageId::Input, &InputRequest { sid, x: 1, y: 0 })
    }

    fn ready() -> Packet {
        Packet::empty(MessageId::Ready)
    }

    /// Two connected players, both ready, battle started at `now`.
    fn started(now: Instant) -> (Game, UnboundedReceiver<Outbound>, UnboundedReceiver<Outbound>) {
        let mut game = new_game(now);
        let mut rx1 = connect(&mut game, P1, 1, now);
        let mut rx2 = connect(&mut game, P2, 2, now);
        game.process_msg(P1, &ready(), now);
        game.process_msg(P2, &ready(), now);
        assert!(game.tick(now));
        assert_eq!(game.state(), GameState::Gaming);
        drain(&mut rx1);
        drain(&mut rx2);
        game.take_events();
        (game, rx1, rx2)
    }

    fn frames_of(packets: &[Packet]) -> Vec<FrameData> {
        only(packets, MessageId::Frame)
            .iter()
            .flat_map(|p| body::<FrameBatch>(p).frames)
            .collect()
    }

    #[test]
    fn test_join_acks_and_emits_joined() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut rx = connect(&mut game, P1, 1, now);

        let packets = drain(&mut rx);
        assert_eq!(packets.len(), 1);
        let reply: ConnectReply = body(&packets[0]);
        assert_eq!(reply.error_code, ErrorCode::Ok);
        assert_eq!(game.take_events(), vec![GameEvent::Joined(P1)]);
        assert!(game.session(P1).unwrap().is_online());
    }

    #[test]
    fn test_join_of_non_member_is_refused_and_closed() {
        let now = Instant::now();
        let mut game = new_game(now);
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new(9));
        assert!(!game.join_game(PlayerId(999), handle, now));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(game.take_events().is_empty());
    }

    #[test]
    fn test_ready_twice_acks_once() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut rx = connect(&mut game, P1, 1, now);
        drain(&mut rx);

        game.process_msg(P1, &ready(), now);
        let all_ready_after_first = game.roster.all_ready();
        game.process_msg(P1, &ready(), now);

        assert_eq!(game.roster.all_ready(), all_ready_after_first);
        assert!(!all_ready_after_first);
        assert_eq!(only(&drain(&mut rx), MessageId::Ready).len(), 1);
        assert!(game.session(P1).unwrap().is_ready());
    }

    #[test]
    fn test_both_ready_starts_with_same_timestamp() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut rx1 = connect(&mut game, P1, 1, now);
        let mut rx2 = connect(&mut game, P2, 2, now);
        game.process_msg(P1, &ready(), now);
        game.process_msg(P2, &ready(), now);
        game.take_events();

        assert!(game.tick(now + Duration::from_millis(33)));
        assert_eq!(game.state(), GameState::Gaming);
        assert_eq!(game.take_events(), vec![GameEvent::Started]);

        let s1 = only(&drain(&mut rx1), MessageId::Start);
        let s2 = only(&drain(&mut rx2), MessageId::Start);
        assert_eq!(s1.len(), 1);
        assert_eq!(s2.len(), 1);
        let t1: StartNotice = body(&s1[0]);
        let t2: StartNotice = body(&s2[0]);
        assert_eq!(t1, t2);
        assert_eq!(t1.timestamp, game.start_time());
    }

    #[test]
    fn test_waits_while_not_everyone_is_ready() {
        let now = Instant::now();
        let mut game = new_game(now);
        let _rx1 = connect(&mut game, P1, 1, now);
        game.process_msg(P1, &ready(), now);
        assert!(game.tick(now + Duration::from_secs(19)));
        assert_eq!(game.state(), GameState::Ready);
    }

    #[test]
    fn test_ready_timeout_forces_start_when_someone_is_online() {
        let now = Instant::now();
        let mut game = new_game(now);
        let _rx1 = connect(&mut game, P1, 1, now);
        assert!(game.tick(now + Duration::from_secs(20)));
        assert_eq!(game.state(), GameState::Gaming);
        assert!(game.session(P1).unwrap().is_ready());
        assert!(game.session(P2).unwrap().is_ready());
        assert_eq!(game.session(P2).unwrap().loading_progress(), 100);
    }

    #[test]
    fn test_ready_timeout_with_nobody_online_ends_empty() {
        let now = Instant::now();
        let mut game = new_game(now);

        assert!(game.tick(now + Duration::from_secs(20)));
        assert_eq!(game.state(), GameState::Over);

        assert!(game.tick(now + Duration::from_secs(21)));
        assert_eq!(game.state(), GameState::Stop);
        assert_eq!(
            game.take_events(),
            vec![GameEvent::Over {
                results: HashMap::new()
            }]
        );

        assert!(!game.tick(now + Duration::from_secs(22)));
        assert!(!game.tick(now + Duration::from_secs(23)));
    }

    #[test]
    fn test_duplicate_input_in_one_frame_is_rejected() {
        let now = Instant::now();
        let (mut game, _rx1, _rx2) = started(now);

        game.process_msg(P1, &input(1), now);
        game.process_msg(P1, &input(2), now);

        let frame = game.engine.frame(0).unwrap();
        assert_eq!(frame.commands().len(), 1);
        assert_eq!(frame.commands()[0].sid, 1);
        assert_eq!(frame.commands()[0].seat, 1);
        assert!(game.dirty);
    }

    #[test]
    fn test_input_before_start_is_ignored() {
        let now = Instant::now();
        let mut game = new_game(now);
        let _rx1 = connect(&mut game, P1, 1, now);
        game.process_msg(P1, &input(1), now);
        assert!(game.engine.frame(0).is_none());
        assert!(!game.dirty);
    }

    #[test]
    fn test_broadcast_waits_for_offset_then_sends_last_frame() {
        let now = Instant::now();
        let (mut game, mut rx1, _rx2) = started(now);

        game.tick(now);
        game.tick(now);
        assert!(only(&drain(&mut rx1), MessageId::Frame).is_empty());

        game.tick(now);
        let frames = frames_of(&drain(&mut rx1));
        assert_eq!(
            frames,
            vec![FrameData {
                frame_id: 2,
                input: vec![]
            }]
        );
        assert_eq!(game.session(P1).unwrap().send_cursor(), 3);
    }

    #[test]
    fn test_input_forces_broadcast_on_next_tick() {
        let now = Instant::now();
        let (mut game, mut rx1, mut rx2) = started(now);

        game.process_msg(P2, &input(5), now);
        game.tick(now);

        for rx in [&mut rx1, &mut rx2] {
            let frames = frames_of(&drain(rx));
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].frame_id, 0);
            assert_eq!(frames[0].input[0].player_id, P2);
            assert_eq!(frames[0].input[0].seat, 2);
        }
        assert!(!game.dirty);
    }

    #[test]
    fn test_stale_heartbeat_pauses_delivery() {
        let now = Instant::now();
        let (mut game, mut rx1, mut rx2) = started(now);
        let later = now + Duration::from_secs(3);

        game.process_msg(P2, &Packet::empty(MessageId::Heartbeat), later);
        assert_eq!(only(&drain(&mut rx2), MessageId::Heartbeat).len(), 1);

        game.process_msg(P2, &input(1), later);
        game.tick(later);

        assert!(frames_of(&drain(&mut rx1)).is_empty());
        assert_eq!(frames_of(&drain(&mut rx2)).len(), 1);
        assert_eq!(game.session(P1).unwrap().send_cursor(), 0);
    }

    #[test]
    fn test_reconnect_replays_full_log_in_batches() {
        let now = Instant::now();
        let (mut game, mut rx1, _rx2) = started(now);

        for frame in 0..80u32 {
            if frame == 50 {
                assert!(game.leave_game(P2, ConnectionId::new(2)));
            }
            game.process_msg(P1, &input(frame as i32), now);
            assert!(game.tick(now));
        }
        assert_eq!(game.frame_count(), 80);
        let live_log = frames_of(&drain(&mut rx1));

        let mut rx2 = connect(&mut game, P2, 3, now);
        let packets = drain(&mut rx2);

        assert_eq!(packets[0].message_id(), Some(MessageId::Connect));
        assert_eq!(packets[1].message_id(), Some(MessageId::Start));
        let batches = only(&packets, MessageId::Frame);
        let sizes: Vec<usize> = batches
            .iter()
            .map(|p| body::<FrameBatch>(p).frames.len())
            .collect();
        assert_eq!(sizes, vec![60, 20]);

        let replayed = frames_of(&packets);
        let ids: Vec<u32> = replayed.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, (0..80).collect::<Vec<_>>());
        assert_eq!(replayed, live_log);
        assert_eq!(game.session(P2).unwrap().send_cursor(), 80);
    }

    #[test]
    fn test_replay_splits_batches_too_large_for_one_packet() {
        let now = Instant::now();
        let players: Vec<PlayerId> = (1..=30).map(PlayerId).collect();
        let mut game = Game::new(RoomId(1), &players, 42, GameConfig::default(), now);
        let _conns: Vec<_> = players
            .iter()
            .map(|&p| connect(&mut game, p, p.0, now))
            .collect();
        for &p in &players {
            game.process_msg(p, &ready(), now);
        }
        game.tick(now);
        assert_eq!(game.state(), GameState::Gaming);

        for frame in 0..70 {
            for &p in &players {
                game.process_msg(p, &input(frame), now);
            }
            assert!(game.tick(now));
        }
        assert_eq!(game.frame_count(), 70);

        let mut rx = connect(&mut game, PlayerId(1), 100, now);
        let packets = drain(&mut rx);
        for batch in only(&packets, MessageId::Frame) {
            assert!(batch.payload().len() <= u16::MAX as usize);
        }

        let replayed = frames_of(&packets);
        let ids: Vec<u32> = replayed.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, (0..70).collect::<Vec<_>>());
        assert!(replayed.iter().all(|f| f.input.len() == 30));
        assert_eq!(game.session(PlayerId(1)).unwrap().send_cursor(), 70);
    }

    #[test]
    fn test_ready_during_battle_replays_log() {
        let now = Instant::now();
        let (mut game, _rx1, mut rx2) = started(now);
        for _ in 0..5 {
            game.tick(now);
        }
        drain(&mut rx2);

        // A fresh connection must confirm readiness again.
        let mut rx2 = connect(&mut game, P2, 3, now);
        drain(&mut rx2);
        game.process_msg(P2, &ready(), now);

        let packets = drain(&mut rx2);
        assert_eq!(only(&packets, MessageId::Ready).len(), 1);
        assert_eq!(only(&packets, MessageId::Start).len(), 1);
        let frames = frames_of(&packets);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_id, 4);
    }

    #[test]
    fn test_results_from_all_online_players_end_the_battle() {
        let now = Instant::now();
        let (mut game, mut rx1, _rx2) = started(now);

        game.process_msg(P1, &msg(MessageId::Result, &ResultReport { winner_id: 7 }), now);
        assert_eq!(only(&drain(&mut rx1), MessageId::Result).len(), 1);
        game.tick(now);
        assert_eq!(game.state(), GameState::Gaming);

        game.process_msg(P2, &msg(MessageId::Result, &ResultReport { winner_id: 9 }), now);
        game.process_msg(P2, &msg(MessageId::Result, &ResultReport { winner_id: 7 }), now);
        game.tick(now);
        assert_eq!(game.state(), GameState::Over);
        game.tick(now);

        let expected = HashMap::from([(P1, 7), (P2, 7)]);
        assert_eq!(game.take_events(), vec![GameEvent::Over { results: expected }]);
        assert!(!game.tick(now));
    }

    #[test]
    fn test_frame_limit_ends_the_battle() {
        let now = Instant::now();
        let config = GameConfig {
            max_frames: 5,
            ..GameConfig::default()
        };
        let mut game = Game::new(RoomId(1), &[P1], 1, config, now);
        let _rx = connect(&mut game, P1, 1, now);
        game.process_msg(P1, &ready(), now);
        game.tick(now);

        for _ in 0..6 {
            game.tick(now);
            assert_eq!(game.state(), GameState::Gaming);
        }
        game.tick(now);
        assert_eq!(game.state(), GameState::Over);
        assert_eq!(game.frame_count(), 6);
    }

    #[test]
    fn test_progress_and_room_info() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut rx1 = connect(&mut game, P1, 1, now);
        let mut rx2 = connect(&mut game, P2, 2, now);
        drain(&mut rx1);
        drain(&mut rx2);

        game.process_msg(P1, &msg(MessageId::Progress, &ProgressReport { progress: 50 }), now);
        assert!(drain(&mut rx1).is_empty());
        let notices = drain(&mut rx2);
        let notice: ProgressNotice = body(&notices[0]);
        assert_eq!(notice, ProgressNotice { player_id: P1, progress: 50 });

        game.process_msg(P2, &Packet::empty(MessageId::JoinRoom), now);
        let reply: JoinRoomReply = body(&drain(&mut rx2)[0]);
        assert_eq!(
            reply,
            JoinRoomReply {
                seat: 2,
                random_seed: 42,
                others: vec![P1],
                progress: vec![50],
            }
        );
    }

    #[test]
    fn test_stale_close_after_replacement_is_ignored() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut old = connect(&mut game, P1, 1, now);
        let _new = connect(&mut game, P1, 2, now);
        game.take_events();

        // The replaced connection got its ack, then its queue closed.
        drain(&mut old);
        assert!(old.try_recv().is_err());

        assert!(!game.leave_game(P1, ConnectionId::new(1)));
        assert!(game.session(P1).unwrap().is_online());
        assert!(game.take_events().is_empty());

        assert!(game.leave_game(P1, ConnectionId::new(2)));
        assert!(!game.session(P1).unwrap().is_online());
        assert_eq!(game.take_events(), vec![GameEvent::Left(P1)]);
    }

    #[test]
    fn test_join_after_battle_end_gets_room_state() {
        let now = Instant::now();
        let mut game = new_game(now);
        game.tick(now + Duration::from_secs(20));
        assert_eq!(game.state(), GameState::Over);

        let mut rx = connect(&mut game, P1, 1, now);
        let reply: ConnectReply = body(&drain(&mut rx)[0]);
        assert_eq!(reply.error_code, ErrorCode::RoomState);
        assert!(!game.session(P1).unwrap().is_ready());
        assert!(game.take_events().is_empty());

        // Left open until the room lets go of every connection.
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        game.process_msg(P1, &ready(), now);
        assert!(!game.session(P1).unwrap().is_ready());
        game.cleanup();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_close_notifies_and_cleanup_releases() {
        let now = Instant::now();
        let mut game = new_game(now);
        let mut rx1 = connect(&mut game, P1, 1, now);
        drain(&mut rx1);

        game.close();
        assert_eq!(only(&drain(&mut rx1), MessageId::Close).len(), 1);

        game.cleanup();
        assert!(!game.session(P1).unwrap().is_online());
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_undecodable_and_unknown_messages_are_ignored() {
        let now = Instant::now();
        let (mut game, mut rx1, _rx2) = started(now);

        let garbage = Packet::raw(MessageId::Input, b"not json".to_vec()).unwrap();
        game.process_msg(P1, &garbage, now);
        game.process_msg(P1, &Packet::decode(&[0, 0, 77]).unwrap(), now);
        game.process_msg(PlayerId(5), &input(1), now);

        assert!(game.engine.frame(0).is_none());
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(game.state(), GameState::Gaming);
    }
}
