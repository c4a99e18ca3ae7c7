//! Repeat and retry policies.
//!
//! A [`Schedule`] is a pure state machine. After every run (and once before
//! the first) the scheduler calls [`Schedule::step`] with the current
//! [`ScheduleState`] and the time; the returned [`ScheduleDecision`] says
//! whether to run again, and after how long.

use crate::types::Time;
use std::rc::Rc;
use std::time::Duration;

/// What a schedule sees at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInput {
    /// Monotonic clock time of the step.
    pub current_time: Time,
    /// The delay waited before the run that just finished, if any.
    pub current_delay: Option<Duration>,
}

/// Progress of a schedule, threaded from one step to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    /// Monotonic time at which the schedule started.
    pub start_time: Time,
    /// Number of steps taken.
    pub iterations: u64,
    /// Time of the previous step.
    pub previous_time: Option<Time>,
    /// Delay reported with the previous step's input.
    pub previous_delay: Option<Duration>,
    /// Delay chosen by the most recent step.
    pub current_delay: Duration,
}

impl ScheduleState {
    /// The state before the first step.
    #[must_use]
    pub const fn initial(start_time: Time) -> Self {
        Self {
            start_time,
            iterations: 0,
            previous_time: None,
            previous_delay: None,
            current_delay: Duration::ZERO,
        }
    }

    /// The state after one more step that chose `delay`.
    #[must_use]
    pub fn advance(&self, input: &ScheduleInput, delay: Option<Duration>) -> Self {
        Self {
            start_time: self.start_time,
            iterations: self.iterations + 1,
            previous_time: Some(input.current_time),
            previous_delay: input.current_delay,
            current_delay: delay.unwrap_or(Duration::ZERO),
        }
    }

    /// Monotonic time elapsed from the start to the previous step.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.previous_time
            .map_or(Duration::ZERO, |time| time.since(self.start_time))
    }
}

/// Whether to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Run again, after `Some(delay)` or right away.
    Continue(Option<Duration>),
    /// Stop.
    Done,
}

/// A repeat/retry policy.
pub trait Schedule {
    /// Computes the next state and decision.
    fn step(&self, state: &ScheduleState, input: &ScheduleInput)
        -> (ScheduleState, ScheduleDecision);

    /// Stops after at most `max` runs, whatever this schedule decides.
    fn take(self, max: u64) -> Take<Self>
    where
        Self: Sized,
    {
        Take { inner: self, max }
    }
}

impl<S: Schedule + ?Sized> Schedule for Box<S> {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        (**self).step(state, input)
    }
}

impl<S: Schedule + ?Sized> Schedule for Rc<S> {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        (**self).step(state, input)
    }
}

/// Runs `n` times back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurs(pub u64);

impl Schedule for Recurs {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        let next = state.advance(input, None);
        let decision = if next.iterations <= self.0 {
            ScheduleDecision::Continue(None)
        } else {
            ScheduleDecision::Done
        };
        (next, decision)
    }
}

/// Runs once right away, then forever with a fixed pause between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spaced(pub Duration);

impl Schedule for Spaced {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        let delay = (state.iterations > 0).then_some(self.0);
        (state.advance(input, delay), ScheduleDecision::Continue(delay))
    }
}

/// Runs once right away, then retries up to `max_retries` times with
/// pauses of `base`, `base * factor`, `base * factor^2`, ...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    /// First pause.
    pub base: Duration,
    /// Growth per retry.
    pub factor: f64,
    /// Number of retries after the first run.
    pub max_retries: u32,
}

impl Exponential {
    /// Doubling backoff from `base`.
    #[must_use]
    pub const fn new(base: Duration, max_retries: u32) -> Self {
        Self {
            base,
            factor: 2.0,
            max_retries,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn pause(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = (self.base.as_nanos() as f64) * self.factor.powi(exponent);
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

impl Schedule for Exponential {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        let step = state.iterations + 1;
        if step == 1 {
            return (state.advance(input, None), ScheduleDecision::Continue(None));
        }
        let retry = step - 2;
        if retry >= u64::from(self.max_retries) {
            return (state.advance(input, None), ScheduleDecision::Done);
        }
        let delay = self.pause(u32::try_from(retry).unwrap_or(u32::MAX));
        (
            state.advance(input, Some(delay)),
            ScheduleDecision::Continue(Some(delay)),
        )
    }
}

/// See [`Schedule::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Take<S> {
    inner: S,
    max: u64,
}

impl<S: Schedule> Schedule for Take<S> {
    fn step(
        &self,
        state: &ScheduleState,
        input: &ScheduleInput,
    ) -> (ScheduleState, ScheduleDecision) {
        let (next, decision) = self.inner.step(state, input);
        if next.iterations > self.max {
            (next, ScheduleDecision::Done)
        } else {
            (next, decision)
        }
    }
}
