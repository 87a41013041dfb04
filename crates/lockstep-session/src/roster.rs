use std::collections::HashMap;
use std::time::Instant;

use lockstep_protocol::{Packet, PlayerId};

use crate::PlayerSession;

/// All sessions of one battle, in roster order.
///
/// Seats are assigned from roster position: the first player sits in seat
/// 1. Roster order is also the order used for broadcasts and for the
/// `others` list in join replies.
#[derive(Debug)]
pub struct SessionRoster {
    sessions: Vec<PlayerSession>,
    index: HashMap<PlayerId, usize>,
}

impl SessionRoster {
    /// Creates one offline session per roster entry.
    ///
    /// A repeated id keeps its first seat; later repeats are dropped.
    pub fn new(players: &[PlayerId], now: Instant) -> Self {
        let mut sessions = Vec::with_capacity(players.len());
        let mut index = HashMap::with_capacity(players.len());
        for &id in players {
            if index.contains_key(&id) {
                tracing::warn!(player_id = %id, "duplicate roster entry ignored");
                continue;
            }
            let seat = sessions.len() as u32 + 1;
            index.insert(id, sessions.len());
            sessions.push(PlayerSession::new(id, seat, now));
        }
        Self { sessions, index }
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.index.get(&id).map(|&i| &self.sessions[i])
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSession> {
        self.index.get(&id).map(|&i| &mut self.sessions[i])
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Player ids in roster order.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.sessions.iter().map(PlayerSession::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.iter_mut()
    }

    /// `true` if every roster member has confirmed readiness.
    pub fn all_ready(&self) -> bool {
        self.sessions.iter().all(PlayerSession::is_ready)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_online()).count()
    }

    /// Sends a copy of `packet` to every online session.
    pub fn broadcast(&self, packet: &Packet) {
        for session in &self.sessions {
            session.send(packet.clone());
        }
    }

    /// Like [`broadcast`](Self::broadcast) but skips `except`.
    pub fn broadcast_except(&self, packet: &Packet, except: PlayerId) {
        for session in self.sessions.iter().filter(|s| s.id() != except) {
            session.send(packet.clone());
        }
    }

    /// Releases every connection.
    pub fn release_all(&mut self) {
        for session in &mut self.sessions {
            session.release();
        }
    }
}
