//! Exclusive handles to a connection's outbound side.
//!
//! Each accepted connection gets a writer task that drains an unbounded
//! queue of [`Outbound`] items. The [`ConnectionHandle`] is the only way to
//! feed that queue. It is deliberately not `Clone`: whoever holds it owns the
//! connection's outbound side. The router owns it until admission, then moves
//! it into the room, where it ends up inside a [`PlayerSession`].
//!
//! Dropping the handle closes the queue; the writer task then closes the
//! connection. That is how a room evicts a replaced connection without
//! touching it from another task.
//!
//! [`PlayerSession`]: crate::PlayerSession

use lockstep_protocol::{Packet, PlayerId};
use lockstep_transport::ConnectionId;
use tokio::sync::mpsc;

/// An item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this packet.
    Packet(Packet),
    /// Flush what is queued, then close the connection.
    Close,
}

/// Exclusive handle to one connection's writer queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    player: Option<PlayerId>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end its writer task drains.
    pub fn channel(
        id: ConnectionId,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                player: None,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identity the router attached after validating the connect
    /// message, if any.
    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    /// Attaches a player identity.
    pub fn tag(&mut self, player: PlayerId) {
        self.player = Some(player);
    }

    /// Queues a packet. Never blocks.
    ///
    /// Returns `false` if the writer task is gone (connection already
    /// closed); callers treat that as a silent drop.
    pub fn send(&self, packet: Packet) -> bool {
        self.tx.send(Outbound::Packet(packet)).is_ok()
    }

    /// Asks the writer to close the connection after flushing.
    pub fn close(self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// `true` once the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
