use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What to do when the room wakes up late for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TickPolicy {
    /// Forget the missed deadlines and schedule the next tick from now.
    /// Frames simply arrive a little later; nothing bursts.
    #[default]
    Skip,
    /// Fire up to `max_catchup` missed ticks back to back, then fall back
    /// to skipping. Keeps frame count closer to wall-clock time.
    CatchUp { max_catchup: u32 },
    /// Keep the original cadence; a late tick is not compensated.
    Drop,
}

/// Tick scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Frames per second.
    pub tick_rate_hz: u32,
    pub policy: TickPolicy,
    /// Fraction of the tick budget after which a slow tick is logged.
    pub budget_warn_threshold: f64,
    /// Fraction after which a slow tick is logged as critical.
    pub budget_critical_threshold: f64,
    pub metrics_enabled: bool,
    /// Upper bound for the random delay added to the first tick, so rooms
    /// created together do not all wake in the same instant.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            metrics_enabled: true,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const DEFAULT_TICK_RATE_HZ: u32 = 30;
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Brings every field into range.
    ///
    /// - `tick_rate_hz` ends up in `1..=MAX_TICK_RATE_HZ`.
    /// - Both thresholds end up in `0.0..=1.0`, warn not above critical.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 {
            warn!("tick_rate_hz is 0, using 1");
            self.tick_rate_hz = 1;
        } else if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz above maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_critical_threshold =
            self.budget_critical_threshold.clamp(0.0, 1.0);
        self.budget_warn_threshold = self
            .budget_warn_threshold
            .clamp(0.0, self.budget_critical_threshold);
        self
    }

    /// Length of one tick. Assumes a validated, non-zero rate.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}
