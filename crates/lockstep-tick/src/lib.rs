//! Fixed-rate frame clock for lockstep rooms.
//!
//! Every room advances its simulation one frame per tick, 30 times a second
//! by default. [`TickScheduler`] owns the deadline arithmetic, decides what
//! to do when the room falls behind ([`TickPolicy`]), and keeps a few
//! cheap metrics about how long each tick's work took.
//!
//! The scheduler is built to sit in a room actor's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(msg) = msg_rx.recv() => game.process_msg(msg),
//!         _ = scheduler.wait_for_tick() => {
//!             let keep_going = game.tick(now());
//!             scheduler.record_tick_end();
//!             if !keep_going { break; }
//!         }
//!     }
//! }
//! ```
//!
//! All deadlines use `tokio::time`, so paused-clock tests drive it
//! deterministically.

mod config;
mod scheduler;

pub use config::{TickConfig, TickPolicy};
pub use scheduler::{Tick, TickMetrics, TickScheduler};
