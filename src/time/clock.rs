//! Clocks.
//!
//! A [`Clock`] reports two readings: monotonic time elapsed since the clock
//! started, and unix time. Causes, fiber ids and timeline arrivals are all
//! stamped with unix time.

use super::source::TimeSource;
use crate::types::Time;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix time read from the operating system.
///
/// Used when no runtime clock is reachable.
pub(crate) fn system_unix_time() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(Time::ZERO, |since| {
            Time::from_nanos(u64::try_from(since.as_nanos()).unwrap_or(u64::MAX))
        })
}

/// Monotonic and unix readings.
pub trait Clock {
    /// Unix time at which the clock started.
    fn start_time(&self) -> Time;

    /// Time elapsed since [`Clock::start_time`].
    fn time(&self) -> Time;

    /// [`Clock::time`] plus `delay`.
    fn time_delay(&self, delay: Duration) -> Time {
        self.time() + delay
    }

    /// The current unix time.
    fn unix_time(&self) -> Time {
        self.start_time() + Duration::from_nanos(self.time().as_nanos())
    }

    /// [`Clock::unix_time`] plus `delay`.
    fn unix_time_delay(&self, delay: Duration) -> Time {
        self.unix_time() + delay
    }

    /// An independent clock starting now.
    fn fork_clock(&self) -> Rc<dyn Clock>;
}

/// A clock backed by a [`TimeSource`].
#[derive(Clone)]
pub struct SourceClock {
    source: Arc<dyn TimeSource>,
    origin: Time,
    start_time: Time,
}

impl SourceClock {
    /// Creates a clock whose monotonic time starts at the source's current
    /// reading and whose unix time starts at `start_time`.
    #[must_use]
    pub fn new(source: Arc<dyn TimeSource>, start_time: Time) -> Self {
        let origin = source.now();
        Self {
            source,
            origin,
            start_time,
        }
    }

    /// A clock starting now, over the same source.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::new(self.source.clone(), self.unix_time())
    }
}

impl Clock for SourceClock {
    fn start_time(&self) -> Time {
        self.start_time
    }

    fn time(&self) -> Time {
        Time::from_nanos(self.source.now().as_nanos().saturating_sub(self.origin.as_nanos()))
    }

    fn fork_clock(&self) -> Rc<dyn Clock> {
        Rc::new(self.fork())
    }
}

impl fmt::Debug for SourceClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceClock")
            .field("start_time", &self.start_time)
            .field("time", &self.time())
            .finish()
    }
}
