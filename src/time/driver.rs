//! Timer driver: the primitive host timer.
//!
//! The driver keeps one-shot callbacks ordered by deadline (a reading of its
//! [`TimeSource`]). Nothing fires on its own: the runtime pumps the driver
//! with [`TimerDriver::process_timers`], parking on the source until the
//! next deadline when there is nothing else to do.

use super::source::TimeSource;
use crate::tracing_compat::trace;
use crate::types::Time;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Callback = Box<dyn FnOnce()>;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    deadline: Time,
    id: u64,
}

impl TimerHandle {
    /// The deadline this registration fires at.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

/// Ordered queue of one-shot timer callbacks.
///
/// Entries with equal deadlines fire in registration order.
pub struct TimerDriver {
    source: Arc<dyn TimeSource>,
    entries: RefCell<BTreeMap<(Time, u64), Callback>>,
    next_id: Cell<u64>,
}

impl TimerDriver {
    /// Creates a driver over the given time source.
    #[must_use]
    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            entries: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Returns the current reading of the underlying source.
    #[must_use]
    pub fn now(&self) -> Time {
        self.source.now()
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn TimeSource> {
        &self.source
    }

    /// Registers `callback` to run once `now() >= deadline` when the driver
    /// is next processed.
    pub fn register(&self, deadline: Time, callback: impl FnOnce() + 'static) -> TimerHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries
            .borrow_mut()
            .insert((deadline, id), Box::new(callback));
        trace!(deadline = %deadline, id, "timer registered");
        TimerHandle { deadline, id }
    }

    /// Cancels a registration.
    ///
    /// Returns true if the timer was pending and is now cancelled.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let removed = self
            .entries
            .borrow_mut()
            .remove(&(handle.deadline, handle.id));
        removed.is_some()
    }

    /// Returns the next deadline that will fire, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.entries
            .borrow()
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Fires every expired timer in deadline order.
    ///
    /// Callbacks run after the queue borrow is released, so they may register
    /// or cancel timers. Returns the number of timers fired.
    pub fn process_timers(&self) -> usize {
        let now = self.source.now();
        let expired = {
            let mut entries = self.entries.borrow_mut();
            if now == Time::MAX {
                std::mem::take(&mut *entries)
            } else {
                let later = entries.split_off(&(now.saturating_add_nanos(1), 0));
                std::mem::replace(&mut *entries, later)
            }
        };
        let fired = expired.len();
        for (_, callback) in expired {
            callback();
        }
        if fired > 0 {
            trace!(now = %now, fired, "timers processed");
        }
        fired
    }

    /// Parks on the source until the next deadline, then fires what expired.
    ///
    /// Returns the number fired, or `None` if no timer is pending.
    pub fn park_and_process(&self) -> Option<usize> {
        let deadline = self.next_deadline()?;
        self.source.park_until(deadline);
        Some(self.process_timers())
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if there are no pending timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("now", &self.now())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use std::rc::Rc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn driver() -> (Arc<VirtualClock>, TimerDriver) {
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_source(clock.clone());
        (clock, driver)
    }

    #[test]
    fn fires_expired_in_deadline_order() {
        init_test("fires_expired_in_deadline_order");
        let (clock, driver) = driver();
        let fired = Rc::new(RefCell::new(Vec::new()));
        for (ms, tag) in [(30, "c"), (10, "a"), (20, "b"), (10, "a2")] {
            let fired = fired.clone();
            driver.register(Time::from_millis(ms), move || fired.borrow_mut().push(tag));
        }

        clock.set(Time::from_millis(20));
        let count = driver.process_timers();
        crate::assert_with_log!(count == 3, "fired count", 3, count);
        crate::assert_with_log!(*fired.borrow() == vec!["a", "a2", "b"], "order", "a, a2, b", fired.borrow().clone());
        crate::assert_with_log!(driver.next_deadline() == Some(Time::from_millis(30)), "remaining", Some(Time::from_millis(30)), driver.next_deadline());
        crate::test_complete!("fires_expired_in_deadline_order");
    }

    #[test]
    fn cancelled_timer_never_fires() {
        init_test("cancelled_timer_never_fires");
        let (_clock, driver) = driver();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let handle = driver.register(Time::from_millis(5), move || flag.set(true));
        let cancelled = driver.cancel(&handle);
        crate::assert_with_log!(cancelled, "cancelled", true, cancelled);
        let again = driver.cancel(&handle);
        crate::assert_with_log!(!again, "second cancel", false, again);
        let result = driver.park_and_process();
        crate::assert_with_log!(result.is_none(), "nothing to park on", None::<usize>, result);
        crate::assert_with_log!(!fired.get(), "not fired", false, fired.get());
        crate::test_complete!("cancelled_timer_never_fires");
    }

    #[test]
    fn callbacks_may_register_more_timers() {
        init_test("callbacks_may_register_more_timers");
        let (clock, driver) = driver();
        let driver = Rc::new(driver);
        let hits = Rc::new(Cell::new(0));
        let (inner_driver, inner_hits) = (driver.clone(), hits.clone());
        driver.register(Time::from_millis(1), move || {
            inner_hits.set(inner_hits.get() + 1);
            let hits = inner_hits.clone();
            inner_driver.register(Time::from_millis(2), move || hits.set(hits.get() + 1));
        });
        driver.park_and_process();
        driver.park_and_process();
        crate::assert_with_log!(hits.get() == 2, "both fired", 2, hits.get());
        crate::assert_with_log!(clock.now() == Time::from_millis(2), "clock parked", Time::from_millis(2), clock.now());
        crate::test_complete!("callbacks_may_register_more_timers");
    }

    #[test]
    fn deadline_at_end_of_time_fires() {
        init_test("deadline_at_end_of_time_fires");
        let (clock, driver) = driver();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        driver.register(Time::MAX, move || flag.set(true));

        let result = driver.park_and_process();
        crate::assert_with_log!(result == Some(1), "fired on first park", Some(1), result);
        crate::assert_with_log!(fired.get(), "callback ran", true, fired.get());
        crate::assert_with_log!(clock.now() == Time::MAX, "clock at the end", Time::MAX, clock.now());
        crate::assert_with_log!(driver.is_empty(), "queue drained", true, driver.is_empty());
        crate::test_complete!("deadline_at_end_of_time_fires");
    }
}
