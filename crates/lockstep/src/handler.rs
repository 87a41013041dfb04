//! Per-connection handler: admission and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the connection's outbound queue.
//! The flow is:
//!   1. Wait for a Connect packet, answering Heartbeat and End meanwhile
//!   2. Validate room, room state, membership, and token; reply with an
//!      error code and keep waiting on failure
//!   3. Tag the connection and hand its outbound side to the room
//!   4. Loop: forward every packet to the room, then report the close

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Fuse;
use lockstep_protocol::{
    ConnectReply, ConnectRequest, ErrorCode, JsonCodec, MessageId, Packet, PlayerId,
    ProtocolError,
};
use lockstep_room::{RoomHandle, RoomManager};
use lockstep_session::{ConnectClaim, ConnectionHandle, Outbound, TokenVerifier};
use lockstep_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::LockstepError;

type WriterTask = Fuse<JoinHandle<()>>;

/// Validates connect requests and routes admitted connections to rooms.
pub(crate) struct Router<V> {
    rooms: Arc<RoomManager>,
    verifier: V,
    handshake_timeout: Duration,
    connections: AtomicUsize,
}

impl<V: TokenVerifier> Router<V> {
    pub(crate) fn new(rooms: Arc<RoomManager>, verifier: V, handshake_timeout: Duration) -> Self {
        Self {
            rooms,
            verifier,
            handshake_timeout,
            connections: AtomicUsize::new(0),
        }
    }

    /// Checks a connect request: room exists, room not over, player on the
    /// roster, token accepted. The first failing check decides the code.
    pub(crate) async fn validate(&self, req: &ConnectRequest) -> Result<RoomHandle, ErrorCode> {
        let player_id = req.player_id;
        let room_id = req.battle_id;

        let Some(room) = self.rooms.get_room(room_id).await else {
            warn!(%player_id, %room_id, "connect to unknown room");
            return Err(ErrorCode::NoRoom);
        };
        if room.is_over() {
            warn!(%player_id, %room_id, "connect to finished room");
            return Err(ErrorCode::RoomState);
        }
        if !room.has_player(player_id) {
            warn!(%player_id, %room_id, "connect from player not in room");
            return Err(ErrorCode::NoPlayer);
        }

        let claim = ConnectClaim {
            player_id,
            room_id,
            token: &req.token,
            room_key: room.secret_key(),
        };
        if let Err(err) = self.verifier.verify(&claim).await {
            warn!(%player_id, %room_id, error = %err, "connect token rejected");
            return Err(ErrorCode::Token);
        }
        Ok(room)
    }

    /// Runs the pre-admission loop. Returns the room and identity once the
    /// room has taken the connection, or `None` if the connection ended
    /// first.
    async fn admit(
        &self,
        conn: &WebSocketConnection,
        mut handle: ConnectionHandle,
        writer: &mut WriterTask,
    ) -> Result<Option<(RoomHandle, PlayerId)>, LockstepError> {
        let deadline = Instant::now() + self.handshake_timeout;
        loop {
            let data = tokio::select! {
                res = conn.recv() => match res? {
                    Some(data) => data,
                    None => return Ok(None),
                },
                _ = &mut *writer => return Ok(None),
                () = time::sleep_until(deadline) => {
                    return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
                }
            };

            let packet = Packet::decode(&data)?;
            match packet.message_id() {
                Some(MessageId::Connect) => {
                    let req: ConnectRequest = packet.decode_body(&JsonCodec)?;
                    match self.validate(&req).await {
                        Ok(room) => {
                            handle.tag(req.player_id);
                            if !room.on_connect(handle).await {
                                return Ok(None);
                            }
                            return Ok(Some((room, req.player_id)));
                        }
                        Err(error_code) => {
                            let reply = Packet::message(
                                &JsonCodec,
                                MessageId::Connect,
                                &ConnectReply { error_code },
                            )?;
                            handle.send(reply);
                        }
                    }
                }
                Some(MessageId::Heartbeat) => {
                    handle.send(Packet::empty(MessageId::Heartbeat));
                }
                Some(MessageId::End) => {
                    handle.send(packet);
                }
                _ => {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "message {} before connect",
                        packet.id_byte()
                    ))
                    .into());
                }
            }
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<V: TokenVerifier>(
    conn: WebSocketConnection,
    router: Arc<Router<V>>,
) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let open = router.connections.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(%conn_id, peer = %conn.peer_addr(), connections = open, "connection opened");

    let (handle, outbound) = ConnectionHandle::channel(conn_id);
    let mut writer = tokio::spawn(write_outbound(Arc::clone(&conn), outbound)).fuse();

    match router.admit(&conn, handle, &mut writer).await {
        Ok(Some((room, player_id))) => {
            info!(%conn_id, %player_id, room_id = %room.id(), "connection admitted");
            forward(&conn, &room, player_id, &mut writer).await;
            room.on_close(conn_id, Some(player_id)).await;
        }
        Ok(None) => debug!(%conn_id, "connection ended before admission"),
        Err(err) => debug!(%conn_id, error = %err, "connection dropped before admission"),
    }

    let open = router.connections.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(%conn_id, connections = open, "connection closed");
}

/// Forwards packets to the room until either side closes.
///
/// Malformed packets are dropped; they never reach the room.
async fn forward(
    conn: &WebSocketConnection,
    room: &RoomHandle,
    player_id: PlayerId,
    writer: &mut WriterTask,
) {
    let conn_id = conn.id();
    loop {
        let data = tokio::select! {
            res = conn.recv() => match res {
                Ok(Some(data)) => data,
                Ok(None) => {
                    debug!(%conn_id, %player_id, "closed by peer");
                    return;
                }
                Err(err) => {
                    debug!(%conn_id, %player_id, error = %err, "recv failed");
                    return;
                }
            },
            _ = &mut *writer => {
                debug!(%conn_id, %player_id, "closed by room");
                return;
            }
        };

        match Packet::decode(&data) {
            Ok(packet) => {
                if !room.on_message(player_id, packet).await {
                    debug!(%conn_id, room_id = %room.id(), "room gone");
                    return;
                }
            }
            Err(err) => debug!(%conn_id, %player_id, error = %err, "malformed packet dropped"),
        }
    }
}

/// Drains a connection's outbound queue until a close is requested or every
/// handle is gone, then closes the connection.
async fn write_outbound(conn: Arc<WebSocketConnection>, mut outbound: UnboundedReceiver<Outbound>) {
    let conn_id = conn.id();
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Packet(packet) => {
                if let Err(err) = conn.send(&packet.encode()).await {
                    debug!(%conn_id, error = %err, "send failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(err) = conn.close().await {
        trace!(%conn_id, error = %err, "close after writer exit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::RoomId;
    use lockstep_room::RoomConfig;
    use lockstep_session::{AllowAll, RoomKeyVerifier};

    fn request(player: u64, room: u64, token: &str) -> ConnectRequest {
        ConnectRequest {
            player_id: PlayerId(player),
            battle_id: RoomId(room),
            token: token.to_string(),
        }
    }

    async fn router_with_room<V: TokenVerifier>(verifier: V) -> (Router<V>, RoomHandle) {
        let rooms = Arc::new(RoomManager::new(RoomConfig::default()));
        let room = rooms
            .create_room(RoomId(1), 0, vec![PlayerId(1), PlayerId(2)], 7, "test")
            .await
            .unwrap();
        (Router::new(rooms, verifier, Duration::from_secs(5)), room)
    }

    #[tokio::test]
    async fn test_validate_accepts_roster_member_with_room_key() {
        let (router, room) = router_with_room(RoomKeyVerifier).await;
        let admitted = router.validate(&request(1, 1, room.secret_key())).await.unwrap();
        assert_eq!(admitted.id(), RoomId(1));
        router.rooms.stop().await;
    }

    #[tokio::test]
    async fn test_validate_checks_in_order() {
        let (router, room) = router_with_room(RoomKeyVerifier).await;
        let key = room.secret_key().to_string();

        assert_eq!(router.validate(&request(1, 9, "x")).await.unwrap_err(), ErrorCode::NoRoom);
        // Membership is checked before the token.
        assert_eq!(router.validate(&request(3, 1, "x")).await.unwrap_err(), ErrorCode::NoPlayer);
        assert_eq!(router.validate(&request(2, 1, "x")).await.unwrap_err(), ErrorCode::Token);
        assert!(router.validate(&request(2, 1, &key)).await.is_ok());

        router.rooms.stop().await;
    }

    #[tokio::test]
    async fn test_validate_with_allow_all_ignores_token() {
        let (router, _room) = router_with_room(AllowAll).await;
        assert!(router.validate(&request(2, 1, "anything")).await.is_ok());
        router.rooms.stop().await;
    }
}
