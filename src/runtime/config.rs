//! Runtime configuration types.
//!
//! Most callers go through [`RuntimeBuilder`](super::builder::RuntimeBuilder)
//! rather than filling in a [`RuntimeConfig`] by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `time_source` | [`TimeSourceKind::Wall`] |
//! | `start_time` | `None` (system unix time for wall clocks, zero for virtual) |
//! | `interruptible` | true |
//! | `trace` | true |

use crate::types::{RuntimeFlags, Time};
use std::fmt;
use std::str::FromStr;

/// Where the runtime reads time from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum TimeSourceKind {
    /// The operating system's monotonic clock. Timers really wait.
    #[default]
    Wall,
    /// A manually advanced clock. Waiting jumps straight to the deadline.
    Virtual,
}

impl TimeSourceKind {
    /// The name used in environment variables and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wall => "wall",
            Self::Virtual => "virtual",
        }
    }
}

impl fmt::Display for TimeSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wall" | "system" => Ok(Self::Wall),
            "virtual" | "test" => Ok(Self::Virtual),
            other => Err(format!("expected `wall` or `virtual`, got {other:?}")),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Time source for clocks and timers.
    pub time_source: TimeSourceKind,
    /// Unix time the runtime clock starts at.
    pub start_time: Option<Time>,
    /// Whether root fibers start interruptible.
    pub interruptible: bool,
    /// Whether root fibers record trace frames.
    pub trace: bool,
}

impl RuntimeConfig {
    /// Fills in values left open.
    ///
    /// A virtual clock without a start time starts at unix time zero, so runs
    /// are reproducible. A wall clock keeps `None` and reads the system time
    /// when the runtime is built.
    pub fn normalize(&mut self) {
        if self.time_source == TimeSourceKind::Virtual && self.start_time.is_none() {
            self.start_time = Some(Time::ZERO);
        }
    }

    /// The runtime flags root fibers start with.
    #[must_use]
    pub const fn flags(&self) -> RuntimeFlags {
        RuntimeFlags::DEFAULT
            .with_interrupt_status(self.interruptible)
            .with_should_trace(self.trace)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            time_source: TimeSourceKind::Wall,
            start_time: None,
            interruptible: true,
            trace: true,
        }
    }
}
