//! `LockstepServer` builder and accept loop.
//!
//! This is the entry point for running a lockstep battle server. It ties
//! together all the layers: transport → protocol → router → room.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lockstep_room::{RoomConfig, RoomManager};
use lockstep_session::TokenVerifier;
use lockstep_transport::{Transport, WebSocketTransport};
use tracing::{error, info};

use crate::handler::{Router, handle_connection};
use crate::{LockstepError, ServerConfig, StartupRoom, TokenMode};

/// Builder for configuring and starting a lockstep server.
///
/// # Example
///
/// ```rust,no_run
/// use lockstep::prelude::*;
///
/// # async fn run() -> Result<(), LockstepError> {
/// let server = LockstepServer::builder()
///     .bind("0.0.0.0:10086")
///     .token_mode(TokenMode::AllowAll)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LockstepServerBuilder {
    config: ServerConfig,
}

impl LockstepServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn token_mode(mut self, mode: TokenMode) -> Self {
        self.config.token_mode = mode;
        self
    }

    /// Sets the configuration every room is created with.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    /// Adds a room to create at startup.
    pub fn room(mut self, room: StartupRoom) -> Self {
        self.config.rooms.push(room);
        self
    }

    /// Binds the listener and creates the startup rooms, checking tokens
    /// with the configured [`TokenMode`].
    pub async fn build(self) -> Result<LockstepServer<TokenMode>, LockstepError> {
        let verifier = self.config.token_mode;
        self.build_with(verifier).await
    }

    /// Like [`build`](Self::build), with a custom token verifier.
    ///
    /// # Errors
    /// - `LockstepError::Transport` if the address cannot be bound.
    /// - `LockstepError::Room` if two startup rooms share an id.
    pub async fn build_with<V: TokenVerifier>(
        self,
        verifier: V,
    ) -> Result<LockstepServer<V>, LockstepError> {
        let config = self.config;
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let rooms = Arc::new(RoomManager::new(config.room.clone()));
        for startup in config.rooms {
            let room = rooms
                .create_room(
                    startup.id,
                    startup.type_tag,
                    startup.players,
                    startup.seed,
                    startup.logic_tag,
                )
                .await?;
            info!(room_id = %room.id(), secret_key = room.secret_key(), "startup room ready");
        }

        let router = Arc::new(Router::new(
            Arc::clone(&rooms),
            verifier,
            config.handshake_timeout,
        ));
        Ok(LockstepServer {
            transport,
            router,
            rooms,
        })
    }
}

/// A lockstep battle server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct LockstepServer<V = TokenMode> {
    transport: WebSocketTransport,
    router: Arc<Router<V>>,
    rooms: Arc<RoomManager>,
}

impl LockstepServer<TokenMode> {
    /// Creates a new builder.
    pub fn builder() -> LockstepServerBuilder {
        LockstepServerBuilder::new()
    }
}

impl<V: TokenVerifier> LockstepServer<V> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, LockstepError> {
        Ok(self.transport.local_addr()?)
    }

    /// The registry rooms are created in. Matchmaking or admin tooling uses
    /// it to open battles while the server runs.
    pub fn room_manager(&self) -> Arc<RoomManager> {
        Arc::clone(&self.rooms)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), LockstepError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then stops every
    /// room and waits for them to exit.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), LockstepError> {
        info!(addr = %self.local_addr()?, "lockstep server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                res = self.transport.accept() => match res {
                    Ok(conn) => {
                        tokio::spawn(handle_connection(conn, Arc::clone(&self.router)));
                    }
                    Err(err) => error!(error = %err, "accept failed"),
                },
            }
        }

        info!("lockstep server shutting down");
        self.transport.shutdown().await?;
        self.rooms.stop().await;
        info!("lockstep server stopped");
        Ok(())
    }
}
