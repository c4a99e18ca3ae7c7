//! Identifier types for runtime entities.
//!
//! - [`FiberId`]: identity of a running fiber, minted by the runtime's
//!   [`IdGenerator`](crate::runtime::IdGenerator).
//! - [`FiberRefId`]: stable identity of a fiber-local slot.
//! - [`Time`]: a nanosecond timestamp shared by clocks, timers and causes.

use core::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static FIBER_REF_COUNTER: AtomicU64 = AtomicU64::new(FiberRefId::FIRST_DYNAMIC);

/// Identity of a fiber.
///
/// `None` names the runtime's root scope, which is not itself a fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FiberId {
    /// No fiber (used by the root scope and external interrupters).
    None,
    /// A live fiber with its sequence number and unix start time.
    Live {
        /// Sequence number from the runtime's id generator.
        id: u64,
        /// Unix time the fiber was created at.
        start_time: Time,
    },
}

impl FiberId {
    /// Creates a live fiber id.
    #[must_use]
    pub const fn new(id: u64, start_time: Time) -> Self {
        Self::Live { id, start_time }
    }

    /// Returns the sequence number, if this is a live id.
    #[must_use]
    pub const fn sequence(self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Live { id, .. } => Some(id),
        }
    }

    /// Returns the start time, if this is a live id.
    #[must_use]
    pub const fn start_time(self) -> Option<Time> {
        match self {
            Self::None => None,
            Self::Live { start_time, .. } => Some(start_time),
        }
    }

    /// Returns true for [`FiberId::None`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "FiberId(None)"),
            Self::Live { id, start_time } => write!(f, "FiberId({id}@{start_time})"),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "F-none"),
            Self::Live { id, .. } => write!(f, "F{id}"),
        }
    }
}

/// Stable identity of a [`FiberRef`](crate::fiber::FiberRef).
///
/// Equality and hashing use only the numeric id; the name is diagnostic.
#[derive(Clone, Copy)]
pub struct FiberRefId {
    id: u64,
    name: &'static str,
}

impl FiberRefId {
    /// Ids below this value are reserved for runtime-owned refs.
    pub const FIRST_DYNAMIC: u64 = 1024;

    /// Reserved id of the ambient default-services layer.
    pub const DEFAULT_SERVICES: Self = Self::reserved(0, "DefaultServices");

    /// Mints a fresh, never reused id.
    #[must_use]
    pub fn fresh(name: &'static str) -> Self {
        Self {
            id: FIBER_REF_COUNTER.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    /// Builds a reserved id (internal use).
    #[must_use]
    pub(crate) const fn reserved(id: u64, name: &'static str) -> Self {
        Self { id, name }
    }

    /// Returns the numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.id
    }

    /// Returns the diagnostic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for FiberRefId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FiberRefId {}

impl std::hash::Hash for FiberRefId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FiberRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRefId({}#{})", self.name, self.id)
    }
}

impl fmt::Display for FiberRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// A timestamp in nanoseconds.
///
/// Monotonic clock readings count from the clock's start; unix readings count
/// from the unix epoch. Both use this type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a new time from seconds since epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Subtracts a duration in nanoseconds, saturating at zero.
    #[must_use]
    pub const fn saturating_sub_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_sub(nanos))
    }

    /// Returns the span from `earlier` to `self`, or zero if `self` is earlier.
    #[must_use]
    pub const fn since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_conversions() {
        assert_eq!(Time::from_secs(1).as_nanos(), 1_000_000_000);
        assert_eq!(Time::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(Time::from_nanos(1_500_000_000).as_millis(), 1500);
    }

    #[test]
    fn time_since_saturates() {
        let early = Time::from_millis(5);
        let late = Time::from_millis(12);
        assert_eq!(late.since(early), Duration::from_millis(7));
        assert_eq!(early.since(late), Duration::ZERO);
        assert_eq!(early + Duration::from_millis(7), late);
    }

    #[test]
    fn fiber_id_accessors() {
        let id = FiberId::new(7, Time::from_millis(3));
        assert_eq!(id.sequence(), Some(7));
        assert_eq!(id.start_time(), Some(Time::from_millis(3)));
        assert!(FiberId::None.is_none());
        assert_eq!(id.to_string(), "F7");
    }

    #[test]
    fn fiber_ref_ids_are_unique_and_compare_by_number() {
        let a = FiberRefId::fresh("a");
        let b = FiberRefId::fresh("a");
        assert_ne!(a, b);
        assert!(a.as_u64() >= FiberRefId::FIRST_DYNAMIC);
        let renamed = FiberRefId::reserved(a.as_u64(), "renamed");
        assert_eq!(a, renamed);
    }
}
