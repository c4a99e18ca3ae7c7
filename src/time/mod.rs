//! Time: clocks, timers, the timeline and the scheduler.
//!
//! Layers, from the host upward:
//! - [`TimeSource`]: raw readings and parking ([`WallClock`], [`VirtualClock`])
//! - [`TimerDriver`]: the primitive host timer, pumped by the runtime
//! - [`Clock`] / [`Timer`]: monotonic and unix readings plus one-shot
//!   callbacks ([`SourceClock`], [`DriverTimer`])
//! - [`Timeline`] and [`Scheduler`]: delayed and repeated effects over a
//!   single armed host timer
//! - [`Schedule`]: repeat/retry policies
//!
//! # Virtual vs Wall Time
//!
//! Everything above the source is the same in production and in tests. With
//! a [`VirtualClock`] the runtime jumps straight to each deadline, so
//! time-driven programs run instantly and deterministically.

mod clock;
mod driver;
pub mod schedule;
mod scheduler;
mod source;
mod timeline;
mod timer;

pub(crate) use clock::system_unix_time;
pub use clock::{Clock, SourceClock};
pub use driver::{TimerDriver, TimerHandle};
pub use schedule::{
    Exponential, Recurs, Schedule, ScheduleDecision, ScheduleInput, ScheduleState, Spaced, Take,
};
pub use scheduler::Scheduler;
pub use source::{TimeSource, VirtualClock, WallClock};
pub use timeline::{Timeline, TimelineKey};
pub use timer::{DriverTimer, Timer};
