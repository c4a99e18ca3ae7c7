//! Time-ordered pending callbacks.

use crate::types::Time;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one entry of a [`Timeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineKey {
    arrival: Time,
    seq: u64,
}

impl TimelineKey {
    /// When the entry becomes ready.
    #[must_use]
    pub const fn arrival(&self) -> Time {
        self.arrival
    }
}

/// A multimap from arrival time to tasks, kept in insertion order per time.
pub struct Timeline<T> {
    buckets: BTreeMap<Time, SmallVec<[(u64, T); 2]>>,
    next_seq: u64,
    len: usize,
}

impl<T> Timeline<T> {
    /// Creates an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            next_seq: 0,
            len: 0,
        }
    }

    /// Adds `task` at `arrival`.
    ///
    /// The flag is true when the entry became the nearest arrival, meaning
    /// whoever waits on [`Timeline::next_arrival`] has to reschedule.
    pub fn add(&mut self, arrival: Time, task: T) -> (TimelineKey, bool) {
        let nearest = self
            .buckets
            .first_key_value()
            .map_or(true, |(first, _)| arrival < *first);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets.entry(arrival).or_default().push((seq, task));
        self.len += 1;
        (TimelineKey { arrival, seq }, nearest)
    }

    /// Removes an entry that has not been drained yet.
    pub fn remove(&mut self, key: &TimelineKey) -> Option<T> {
        let bucket = self.buckets.get_mut(&key.arrival)?;
        let index = bucket.iter().position(|(seq, _)| *seq == key.seq)?;
        let (_, task) = bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(&key.arrival);
        }
        self.len -= 1;
        Some(task)
    }

    /// Drains every task with arrival at or before `now`, earliest first.
    pub fn get_ready_tasks(&mut self, now: Time) -> Vec<T> {
        let ready = if now == Time::MAX {
            std::mem::take(&mut self.buckets)
        } else {
            let later = self.buckets.split_off(&now.saturating_add_nanos(1));
            std::mem::replace(&mut self.buckets, later)
        };
        let tasks: Vec<T> = ready
            .into_values()
            .flat_map(|bucket| bucket.into_iter().map(|(_, task)| task))
            .collect();
        self.len -= tasks.len();
        tasks
    }

    /// The earliest pending arrival.
    #[must_use]
    pub fn next_arrival(&self) -> Option<Time> {
        self.buckets.keys().next().copied()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pending tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Timeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("len", &self.len)
            .field("next_arrival", &self.next_arrival())
            .finish()
    }
}
