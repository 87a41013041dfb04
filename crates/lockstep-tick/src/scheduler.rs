use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

use crate::{TickConfig, TickPolicy};

/// One fired tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 1-based tick counter.
    pub number: u64,
    /// `true` if the wake-up came more than 10% of a tick late.
    pub overrun: bool,
    /// Deadlines that were given up on because of lateness.
    pub skipped: u64,
}

/// Counters about tick work, updated by
/// [`record_tick_end`](TickScheduler::record_tick_end).
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Moving average of work time per tick (alpha 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Last tick's work time divided by the tick length.
    pub budget_utilization: f64,
}

/// Fixed-rate tick source for one room.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    count: u64,
    deadline: TokioInstant,
    work_started: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one period (plus jitter)
    /// from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.tick_duration();
        let jitter = if config.initial_jitter_us > 0 {
            Duration::from_micros(
                rand::rng().random_range(0..config.initial_jitter_us),
            )
        } else {
            Duration::ZERO
        };
        debug!(
            rate_hz = config.tick_rate_hz,
            policy = ?config.policy,
            "tick scheduler created"
        );
        Self {
            deadline: TokioInstant::now() + period + jitter,
            config,
            period,
            count: 0,
            work_started: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next deadline and schedules the one after it.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the
    /// deadline untouched, so it can sit in a `select!` loop.
    pub async fn wait_for_tick(&mut self) -> Tick {
        time::sleep_until(self.deadline).await;

        let now = TokioInstant::now();
        let (next, overrun, skipped) =
            reschedule(self.config.policy, self.deadline, now, self.period);
        self.deadline = next;
        self.count += 1;
        self.work_started = Some(Instant::now());

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += skipped;
        if overrun {
            self.metrics.total_overruns += 1;
            if skipped > 0 {
                warn!(
                    tick = self.count,
                    skipped,
                    policy = ?self.config.policy,
                    "tick overrun"
                );
            }
        }
        trace!(tick = self.count, overrun, "tick");

        Tick {
            number: self.count,
            overrun,
            skipped,
        }
    }

    /// Marks the end of the work done for the current tick.
    ///
    /// Does nothing unless a tick fired since the last call.
    pub fn record_tick_end(&mut self) {
        let Some(started) = self.work_started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        let utilization = elapsed.as_secs_f64() / self.period.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_critical_threshold {
            warn!(
                tick = self.count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "tick work exceeded its budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            debug!(
                tick = self.count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "tick work close to its budget"
            );
        }

        if self.config.metrics_enabled {
            self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            self.metrics.avg_tick_time = Duration::from_secs_f64(
                prev * 0.9 + elapsed.as_secs_f64() * 0.1,
            );
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.count
    }

    pub fn tick_duration(&self) -> Duration {
        self.period
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}

/// Computes the deadline after `deadline`, given that the scheduler woke at
/// `now`. Returns `(next, overrun, skipped)`.
fn reschedule(
    policy: TickPolicy,
    deadline: TokioInstant,
    now: TokioInstant,
    period: Duration,
) -> (TokioInstant, bool, u64) {
    let late_by = now.saturating_duration_since(deadline);
    let overrun = late_by > period / 10;
    if !overrun {
        return (deadline + period, false, 0);
    }
    let behind = (late_by.as_nanos() / period.as_nanos()) as u64;
    match policy {
        TickPolicy::Skip => (now + period, true, behind),
        TickPolicy::CatchUp { max_catchup } => {
            let max = u64::from(max_catchup);
            if behind <= max {
                (deadline + period, true, 0)
            } else {
                (now + period, true, behind - max)
            }
        }
        TickPolicy::Drop => (deadline + period, true, 0),
    }
}
