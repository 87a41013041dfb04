//! Room and game configuration, and the game state machine's states.

use std::fmt;
use std::time::Duration;

use lockstep_tick::TickConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Rules of one battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// How long the room waits for everyone to confirm readiness before
    /// starting with whoever is online.
    pub ready_timeout: Duration,

    /// The battle ends once the frame count goes past this. The default is
    /// three minutes at 30 Hz plus a little slack.
    pub max_frames: u32,

    /// A regular broadcast is skipped until the slowest eligible player is
    /// at least this many frames behind.
    pub broadcast_offset_frames: u32,

    /// Cap on frames per outbound frame message.
    pub max_frames_per_message: usize,

    /// Players whose last heartbeat is this old stop receiving frames until
    /// the next heartbeat arrives.
    pub bad_network_threshold: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            max_frames: 30 * 60 * 3 + 100,
            broadcast_offset_frames: 3,
            max_frames_per_message: 60,
            bad_network_threshold: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings for a room actor and the game it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Frame clock. 30 Hz by default.
    pub tick: TickConfig,

    /// A room is shut down this long after creation no matter what.
    pub inactivity_timeout: Duration,

    /// Time between the close notice and the release of all connections.
    pub close_grace: Duration,

    /// Capacity of the inbound message queue.
    pub message_queue: usize,

    /// Capacity of the queue of newly admitted connections.
    pub connect_queue: usize,

    /// Capacity of the queue of closed connections.
    pub disconnect_queue: usize,

    pub game: GameConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
            inactivity_timeout: Duration::from_secs(5 * 60),
            close_grace: Duration::from_secs(3),
            message_queue: 2048,
            connect_queue: 8,
            disconnect_queue: 8,
            game: GameConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// Lifecycle of a battle.
///
/// States only ever move forward:
///
/// ```text
/// Ready ──→ Gaming ──→ Over ──→ Stop
///   └──────────────────↑
/// ```
///
/// - **Ready**: players connect, load, and confirm readiness.
/// - **Gaming**: the frame log grows one frame per tick and is streamed
///   to players.
/// - **Over**: the battle has ended; results get published on the next
///   tick.
/// - **Stop**: nothing left to do; the room shuts down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum GameState {
    Ready,
    Gaming,
    Over,
    Stop,
}

impl GameState {
    /// Whether `target` is a legal next state.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Ready, Self::Gaming)
                | (Self::Ready, Self::Over)
                | (Self::Gaming, Self::Over)
                | (Self::Over, Self::Stop)
        )
    }

    /// `true` once the battle can no longer be joined.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Over | Self::Stop)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
