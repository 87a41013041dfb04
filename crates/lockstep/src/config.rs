//! Server configuration, loadable from a JSON file.
//!
//! Every field has a default, so a config file only needs the fields it
//! changes:
//!
//! ```json
//! {
//!   "bind_addr": "0.0.0.0:10086",
//!   "token_mode": "allow_all",
//!   "rooms": [{ "id": 1, "players": [1, 2], "seed": 7 }]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use lockstep_protocol::{PlayerId, RoomId};
use lockstep_room::RoomConfig;
use lockstep_session::{AllowAll, ConnectClaim, RoomKeyVerifier, SessionError, TokenVerifier};
use serde::{Deserialize, Serialize};

/// Errors while loading a [`ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How connect tokens are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// The token must equal the room's secret key.
    #[default]
    RoomKey,
    /// Any token is accepted.
    AllowAll,
}

impl TokenVerifier for TokenMode {
    async fn verify(&self, claim: &ConnectClaim<'_>) -> Result<(), SessionError> {
        match self {
            Self::RoomKey => RoomKeyVerifier.verify(claim).await,
            Self::AllowAll => AllowAll.verify(claim).await,
        }
    }
}

/// A room created when the server starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupRoom {
    pub id: RoomId,
    pub players: Vec<PlayerId>,
    #[serde(default)]
    pub type_tag: i32,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub logic_tag: String,
}

/// Top-level server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// A connection that has not been admitted to a room within this time
    /// is closed.
    pub handshake_timeout: Duration,

    pub token_mode: TokenMode,

    /// Rooms to create at startup.
    pub rooms: Vec<StartupRoom>,

    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:10086".to_string(),
            handshake_timeout: Duration::from_secs(10),
            token_mode: TokenMode::default(),
            rooms: Vec::new(),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config file.
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, `ConfigError::Parse`
    /// if it is not a valid config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses a JSON config. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.room.tick = config.room.tick.validated();
        Ok(config)
    }
}
