//! The per-player session record.
//!
//! A session tracks:
//! - WHO the player is and WHERE they sit (`id`, `seat`)
//! - WHETHER they can be served frames (`ready`, `online`, heartbeat)
//! - HOW FAR they have been served (`send_cursor`)
//! - the connection currently bound to them, if any

use std::time::{Duration, Instant};

use lockstep_protocol::{Packet, PlayerId};
use lockstep_transport::ConnectionId;

use crate::ConnectionHandle;

/// One roster member's state inside a battle.
///
/// Created once when the game is built and kept until the room exits.
/// Only the owning room actor ever touches it.
#[derive(Debug)]
pub struct PlayerSession {
    id: PlayerId,
    seat: u32,
    ready: bool,
    online: bool,
    loading_progress: i32,
    last_heartbeat: Instant,
    /// Number of frames already delivered; the next frame to send.
    send_cursor: u32,
    connection: Option<ConnectionHandle>,
}

impl PlayerSession {
    /// Creates an offline, not-ready session.
    pub fn new(id: PlayerId, seat: u32, now: Instant) -> Self {
        Self {
            id,
            seat,
            ready: false,
            online: false,
            loading_progress: 0,
            last_heartbeat: now,
            send_cursor: 0,
            connection: None,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// 1-based position in the roster.
    pub fn seat(&self) -> u32 {
        self.seat
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Sets the ready flag. Returns `true` if the flag changed.
    pub fn set_ready(&mut self, ready: bool) -> bool {
        let changed = self.ready != ready;
        self.ready = ready;
        changed
    }

    /// Online means marked online *and* holding a connection.
    pub fn is_online(&self) -> bool {
        self.online && self.connection.is_some()
    }

    pub fn loading_progress(&self) -> i32 {
        self.loading_progress
    }

    pub fn set_loading_progress(&mut self, progress: i32) {
        self.loading_progress = progress;
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn refresh_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// `true` if no heartbeat arrived within `threshold` before `now`.
    pub fn heartbeat_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) >= threshold
    }

    pub fn send_cursor(&self) -> u32 {
        self.send_cursor
    }

    pub fn set_send_cursor(&mut self, cursor: u32) {
        self.send_cursor = cursor;
    }

    /// Id of the bound connection, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(ConnectionHandle::id)
    }

    /// Binds a new connection and returns the one it replaces.
    ///
    /// The player must confirm readiness again on the new connection, and
    /// the heartbeat clock restarts.
    pub fn connect(
        &mut self,
        handle: ConnectionHandle,
        now: Instant,
    ) -> Option<ConnectionHandle> {
        let previous = self.connection.replace(handle);
        self.online = true;
        self.ready = false;
        self.last_heartbeat = now;
        previous
    }

    /// Releases the connection if `conn_id` is the one currently bound.
    ///
    /// Returns `false` (and changes nothing) for a stale id, which happens
    /// when the close of an already replaced connection arrives late.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> bool {
        if self.connection_id() != Some(conn_id) {
            return false;
        }
        self.release();
        true
    }

    /// Drops the connection (its writer task closes it) and marks the
    /// session offline and not ready.
    pub fn release(&mut self) {
        self.connection = None;
        self.online = false;
        self.ready = false;
    }

    /// Queues a packet for this player. Silently does nothing when the
    /// player is offline.
    pub fn send(&self, packet: Packet) {
        if !self.is_online() {
            return;
        }
        if let Some(conn) = &self.connection {
            if !conn.send(packet) {
                tracing::trace!(player_id = %self.id, "writer gone, packet dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outbound;
    use lockstep_protocol::MessageId;

    fn session() -> PlayerSession {
        PlayerSession::new(PlayerId(1), 1, Instant::now())
    }

    #[test]
    fn test_new_session_is_offline_and_not_ready() {
        let s = session();
        assert!(!s.is_online());
        assert!(!s.is_ready());
        assert_eq!(s.send_cursor(), 0);
        assert_eq!(s.connection_id(), None);
    }

    #[test]
    fn test_connect_marks_online_and_resets_ready() {
        let mut s = session();
        s.set_ready(true);
        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new(1));
        assert!(s.connect(handle, Instant::now()).is_none());
        assert!(s.is_online());
        assert!(!s.is_ready());
    }

    #[test]
    fn test_connect_returns_evicted_handle() {
        let mut s = session();
        let (a, _ra) = ConnectionHandle::channel(ConnectionId::new(1));
        let (b, _rb) = ConnectionHandle::channel(ConnectionId::new(2));
        s.connect(a, Instant::now());
        let evicted = s.connect(b, Instant::now()).expect("should evict");
        assert_eq!(evicted.id(), ConnectionId::new(1));
        assert_eq!(s.connection_id(), Some(ConnectionId::new(2)));
    }

    #[test]
    fn test_disconnect_with_stale_id_is_ignored() {
        let mut s = session();
        let (b, _rb) = ConnectionHandle::channel(ConnectionId::new(2));
        s.connect(b, Instant::now());

        assert!(!s.disconnect(ConnectionId::new(1)));
        assert!(s.is_online());

        assert!(s.disconnect(ConnectionId::new(2)));
        assert!(!s.is_online());
    }

    #[test]
    fn test_send_when_offline_is_noop() {
        let mut s = session();
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new(1));
        s.connect(handle, Instant::now());
        s.send(Packet::empty(MessageId::Heartbeat));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Packet(_))));

        s.release();
        s.send(Packet::empty(MessageId::Heartbeat));
        // Release dropped the handle: the queue is now closed and empty.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_heartbeat_stale_threshold() {
        let start = Instant::now();
        let mut s = PlayerSession::new(PlayerId(1), 1, start);
        let threshold = Duration::from_secs(2);
        assert!(!s.heartbeat_stale(start + Duration::from_millis(1999), threshold));
        assert!(s.heartbeat_stale(start + Duration::from_secs(2), threshold));

        s.refresh_heartbeat(start + Duration::from_secs(2));
        assert!(!s.heartbeat_stale(start + Duration::from_secs(3), threshold));
    }

    #[test]
    fn test_set_ready_reports_change() {
        let mut s = session();
        assert!(s.set_ready(true));
        assert!(!s.set_ready(true));
        assert!(s.is_ready());
    }
}
