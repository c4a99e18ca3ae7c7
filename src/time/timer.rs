//! Timers: a clock plus one-shot delayed callbacks.

use super::clock::{Clock, SourceClock};
use super::driver::TimerDriver;
use crate::sync::Disposable;
use crate::types::Time;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// A clock that can also call back after a delay.
pub trait Timer: Clock {
    /// Calls `callback` with the clock's monotonic time once `delay` has
    /// elapsed. Disposing the handle before then cancels the call.
    fn set_timer(&self, callback: Box<dyn FnOnce(Time)>, delay: Duration) -> Disposable;

    /// A timer over a forked clock, sharing the same host timer.
    fn fork_timer(&self) -> Rc<dyn Timer>;
}

/// [`Timer`] over the runtime's [`TimerDriver`].
#[derive(Clone)]
pub struct DriverTimer {
    clock: SourceClock,
    driver: Rc<TimerDriver>,
}

impl DriverTimer {
    /// Creates a timer whose unix time starts at `start_time`.
    #[must_use]
    pub fn new(driver: Rc<TimerDriver>, start_time: Time) -> Self {
        Self {
            clock: SourceClock::new(driver.source().clone(), start_time),
            driver,
        }
    }

    /// The clock readings come from.
    #[must_use]
    pub const fn clock(&self) -> &SourceClock {
        &self.clock
    }
}

impl Clock for DriverTimer {
    fn start_time(&self) -> Time {
        self.clock.start_time()
    }

    fn time(&self) -> Time {
        self.clock.time()
    }

    fn fork_clock(&self) -> Rc<dyn Clock> {
        self.clock.fork_clock()
    }
}

impl Timer for DriverTimer {
    fn set_timer(&self, callback: Box<dyn FnOnce(Time)>, delay: Duration) -> Disposable {
        let clock = self.clock.clone();
        let handle = self
            .driver
            .register(self.driver.now() + delay, move || callback(clock.time()));
        let driver = Rc::downgrade(&self.driver);
        Disposable::new(move || {
            if let Some(driver) = driver.upgrade() {
                driver.cancel(&handle);
            }
        })
    }

    fn fork_timer(&self) -> Rc<dyn Timer> {
        Rc::new(Self {
            clock: self.clock.fork(),
            driver: self.driver.clone(),
        })
    }
}

impl fmt::Debug for DriverTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverTimer")
            .field("clock", &self.clock)
            .field("pending", &self.driver.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use std::cell::Cell;
    use std::sync::Arc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn timer() -> (Rc<TimerDriver>, DriverTimer) {
        let driver = Rc::new(TimerDriver::with_source(Arc::new(VirtualClock::new())));
        let timer = DriverTimer::new(driver.clone(), Time::from_secs(100));
        (driver, timer)
    }

    #[test]
    fn fires_with_clock_time_after_delay() {
        init_test("fires_with_clock_time_after_delay");
        let (driver, timer) = timer();
        let seen = Rc::new(Cell::new(None));
        let slot = seen.clone();
        let _handle = timer.set_timer(
            Box::new(move |time| slot.set(Some(time))),
            Duration::from_millis(40),
        );
        driver.process_timers();
        crate::assert_with_log!(seen.get().is_none(), "not yet", None::<Time>, seen.get());
        driver.park_and_process();
        crate::assert_with_log!(seen.get() == Some(Time::from_millis(40)), "fired", Some(Time::from_millis(40)), seen.get());
        crate::test_complete!("fires_with_clock_time_after_delay");
    }

    #[test]
    fn disposing_cancels() {
        init_test("disposing_cancels");
        let (driver, timer) = timer();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let handle = timer.set_timer(Box::new(move |_| flag.set(true)), Duration::from_millis(1));
        handle.dispose();
        crate::assert_with_log!(driver.is_empty(), "deregistered", 0, driver.pending_count());
        crate::assert_with_log!(!fired.get(), "not fired", false, fired.get());
        crate::test_complete!("disposing_cancels");
    }
}
