//! Time sources: where readings come from and how the runtime waits.
//!
//! The runtime works with both production (wall clock) and virtual time. A
//! [`TimeSource`] reports monotonic readings from its own epoch and knows how
//! to wait until a reading is reached: the wall clock sleeps the thread, the
//! virtual clock jumps straight to the deadline.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic readings plus a way to wait for one.
///
/// The timer driver keys its queue on these readings and parks on the
/// source when a blocking run has nothing ready to fire.
pub trait TimeSource: Send + Sync {
    /// Nanoseconds since the source's epoch.
    fn now(&self) -> Time;

    /// Blocks (or jumps) until `now() >= deadline`.
    fn park_until(&self, deadline: Time);
}

/// Real elapsed time, measured from construction.
///
/// Parking puts the calling thread to sleep, so `Runtime::block_on` on a
/// wall-time runtime takes as long as its sleeps say.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Starts measuring from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed();
        Time::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }

    fn park_until(&self, deadline: Time) {
        let remaining = deadline.since(self.now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

/// Simulated time for deterministic runs.
///
/// The reading moves only through [`advance`](Self::advance),
/// [`advance_to`](Self::advance_to), [`set`](Self::set), or a park, which
/// jumps straight to the deadline. An hour-long `sleep` on a virtual runtime
/// therefore finishes at once, with every timestamp in its causes exact.
///
/// ```
/// use strand::time::{TimeSource, VirtualClock};
/// use strand::types::Time;
///
/// let clock = VirtualClock::starting_at(Time::from_millis(5));
/// clock.park_until(Time::from_secs(3600));
/// assert_eq!(clock.now(), Time::from_secs(3600));
///
/// // Parking on a past deadline leaves the reading alone.
/// clock.park_until(Time::ZERO);
/// assert_eq!(clock.now(), Time::from_secs(3600));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// A clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given reading.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Moves the reading forward by `nanos`, stopping at [`Time::MAX`].
    pub fn advance(&self, nanos: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(nanos))
            });
    }

    /// Advances time to `time`. No-op if `time` is in the past.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }

    /// Sets the current reading, possibly backwards.
    pub fn set(&self, time: Time) {
        self.now.store(time.as_nanos(), Ordering::Release);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }

    fn park_until(&self, deadline: Time) {
        self.advance_to(deadline);
    }
}
