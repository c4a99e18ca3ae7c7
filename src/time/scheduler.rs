//! The scheduler: delayed and repeated effects over one host timer.
//!
//! Pending wakeups live in a [`Timeline`] keyed by unix arrival time. The
//! scheduler keeps at most one timer armed with the [`Timer`], always for the
//! nearest arrival. An insertion that becomes the nearest re-arms it; when
//! the timeline drains the timer is released, so an idle scheduler causes no
//! wakeups.

use super::clock::Clock;
use super::schedule::{Schedule, ScheduleDecision, ScheduleInput, ScheduleState};
use super::timeline::Timeline;
use super::timer::Timer;
use crate::effect::Effect;
use crate::runtime::services::get_default_service;
use crate::runtime::RuntimeOptions;
use crate::sync::{Disposable, Future};
use crate::tracing_compat::trace;
use crate::types::Time;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

type Task = Box<dyn FnOnce()>;

struct Armed {
    arrival: Time,
    handle: Disposable,
}

struct SchedulerCore {
    timer: Rc<dyn Timer>,
    timeline: RefCell<Timeline<Task>>,
    armed: RefCell<Option<Armed>>,
    disposed: Cell<bool>,
}

impl SchedulerCore {
    fn add(self: &Rc<Self>, arrival: Time, task: Task) -> Option<Disposable> {
        if self.disposed.get() {
            return None;
        }
        let (key, nearest) = self.timeline.borrow_mut().add(arrival, task);
        if nearest {
            self.schedule_next_run();
        }
        let core = Rc::downgrade(self);
        Some(Disposable::new(move || {
            let Some(core) = core.upgrade() else {
                return;
            };
            let removed = core.timeline.borrow_mut().remove(&key);
            if removed.is_some() && core.timeline.borrow().is_empty() {
                core.release();
            }
        }))
    }

    fn schedule_next_run(self: &Rc<Self>) {
        let next = self.timeline.borrow().next_arrival();
        let Some(next) = next else {
            self.release();
            return;
        };
        let earlier = self
            .armed
            .borrow()
            .as_ref()
            .map_or(true, |armed| next < armed.arrival);
        if !earlier {
            return;
        }
        self.release();
        let delay = next.since(self.timer.unix_time());
        let core = Rc::downgrade(self);
        let handle = self.timer.set_timer(
            Box::new(move |_| {
                if let Some(core) = core.upgrade() {
                    core.run_ready_tasks();
                }
            }),
            delay,
        );
        trace!(arrival = %next, delay = ?delay, "scheduler timer armed");
        *self.armed.borrow_mut() = Some(Armed {
            arrival: next,
            handle,
        });
    }

    fn release(&self) {
        let armed = self.armed.borrow_mut().take();
        if let Some(armed) = armed {
            armed.handle.dispose();
        }
    }

    fn run_ready_tasks(self: &Rc<Self>) {
        // The armed timer just fired.
        self.armed.borrow_mut().take();
        let now = self.timer.unix_time();
        let tasks = self.timeline.borrow_mut().get_ready_tasks(now);
        trace!(now = %now, ready = tasks.len(), "scheduler running ready tasks");
        for task in tasks {
            task();
        }
        self.schedule_next_run();
    }

    fn dispose(&self) {
        self.disposed.set(true);
        self.release();
        let dropped = std::mem::take(&mut *self.timeline.borrow_mut());
        drop(dropped);
    }
}

/// Delays and repeats effects.
///
/// Clones share the timeline. [`Scheduler::fork`] shares it too but reads
/// time from a forked clock.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<SchedulerCore>,
    clock: Rc<dyn Timer>,
}

impl Scheduler {
    /// Creates a scheduler arming `timer`.
    #[must_use]
    pub fn new(timer: Rc<dyn Timer>) -> Self {
        Self {
            core: Rc::new(SchedulerCore {
                timer: timer.clone(),
                timeline: RefCell::new(Timeline::new()),
                armed: RefCell::new(None),
                disposed: Cell::new(false),
            }),
            clock: timer,
        }
    }

    /// The current fiber's scheduler, from its context or default services.
    #[must_use]
    pub fn current<E: 'static>() -> Effect<E, Self> {
        Effect::<E, RuntimeOptions>::get_runtime_options().flat_map(|options: RuntimeOptions| {
            match get_default_service::<Self>(&options.context, &options.fiber_refs) {
                Some(scheduler) => Effect::of(scheduler),
                None => Effect::die("no Scheduler service is available"),
            }
        })
    }

    /// The timer readings come from.
    #[must_use]
    pub fn timer(&self) -> Rc<dyn Timer> {
        self.clock.clone()
    }

    /// A scheduler sharing this timeline, with its own forked clock.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            core: self.core.clone(),
            clock: self.clock.fork_timer(),
        }
    }

    /// Queues `task` to run once `delay` has elapsed.
    ///
    /// Returns `None` after [`Scheduler::dispose`]. Disposing the handle
    /// before the task runs cancels it.
    pub fn schedule_task(&self, delay: Duration, task: impl FnOnce() + 'static) -> Option<Disposable> {
        let arrival = self.clock.unix_time_delay(delay);
        self.core.add(arrival, Box::new(task))
    }

    /// Runs `effect` once `duration` has elapsed.
    ///
    /// The fiber suspends until then. If it is interrupted first, the pending
    /// wakeup is cancelled.
    #[must_use]
    pub fn delay<E: 'static, A: 'static>(&self, effect: Effect<E, A>, duration: Duration) -> Effect<E, A> {
        let scheduler = self.clone();
        Effect::suspend(move || {
            let future = Future::<E, A>::pending();
            let start = future.clone();
            let effect = effect.clone();
            let task = move || {
                start.complete(effect);
            };
            match scheduler.schedule_task(duration, task) {
                Some(cancel) => future.wait().tap_failure(move || cancel.dispose()),
                None => Effect::die("scheduler is disposed"),
            }
        })
    }

    /// Runs `effect` repeatedly as `schedule` decides and succeeds with the
    /// final schedule state.
    ///
    /// The first step happens before the first run, so a schedule that is
    /// done right away never runs the effect. A failure of the effect stops
    /// the loop and fails the result.
    #[must_use]
    pub fn schedule<E: 'static, A: 'static>(
        &self,
        effect: Effect<E, A>,
        schedule: impl Schedule + 'static,
    ) -> Effect<E, ScheduleState> {
        let scheduler = self.clone();
        let schedule: Rc<dyn Schedule> = Rc::new(schedule);
        Effect::suspend(move || {
            let start = scheduler.clock.time();
            let input = ScheduleInput {
                current_time: start,
                current_delay: None,
            };
            let (state, decision) = schedule.step(&ScheduleState::initial(start), &input);
            schedule_loop(
                scheduler.clone(),
                effect.clone(),
                schedule.clone(),
                state,
                decision,
            )
        })
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.core.timeline.borrow().len()
    }

    /// Returns true while a host timer is armed.
    #[must_use]
    pub fn has_armed_timer(&self) -> bool {
        self.core.armed.borrow().is_some()
    }

    /// Releases the host timer and drops every queued task.
    ///
    /// Later delays fail with a defect.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// Returns true once disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.get()
    }
}

fn schedule_loop<E: 'static, A: 'static>(
    scheduler: Scheduler,
    effect: Effect<E, A>,
    schedule: Rc<dyn Schedule>,
    state: ScheduleState,
    decision: ScheduleDecision,
) -> Effect<E, ScheduleState> {
    let ScheduleDecision::Continue(delay) = decision else {
        return Effect::of(state);
    };
    let run = match delay {
        Some(delay) => scheduler.delay(effect.clone(), delay),
        None => effect.clone(),
    };
    run.flat_map(move |_| {
        let input = ScheduleInput {
            current_time: scheduler.clock.time(),
            current_delay: delay,
        };
        let (next, decision) = schedule.step(&state, &input);
        schedule_loop(
            scheduler.clone(),
            effect.clone(),
            schedule.clone(),
            next,
            decision,
        )
    })
}

impl Clock for Scheduler {
    fn start_time(&self) -> Time {
        self.clock.start_time()
    }

    fn time(&self) -> Time {
        self.clock.time()
    }

    fn unix_time(&self) -> Time {
        self.clock.unix_time()
    }

    fn fork_clock(&self) -> Rc<dyn Clock> {
        self.clock.fork_clock()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending_tasks())
            .field("armed", &self.has_armed_timer())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<E: 'static, A: 'static> Effect<E, A> {
    /// Runs `self` after `duration`, on the current fiber's scheduler.
    #[must_use]
    pub fn delayed(self, duration: Duration) -> Self {
        Scheduler::current::<E>()
            .flat_map(move |scheduler: Scheduler| scheduler.delay(self.clone(), duration))
    }

    /// Runs `self` as `schedule` decides, on the current fiber's scheduler.
    #[must_use]
    pub fn repeat(self, schedule: impl Schedule + 'static) -> Effect<E, ScheduleState> {
        let schedule: Rc<dyn Schedule> = Rc::new(schedule);
        Scheduler::current::<E>().flat_map(move |scheduler: Scheduler| {
            scheduler.schedule(self.clone(), schedule.clone())
        })
    }
}

impl<E: 'static> Effect<E, ()> {
    /// Succeeds with `()` after `duration`.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::unit().delayed(duration)
    }
}
