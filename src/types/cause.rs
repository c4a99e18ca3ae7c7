//! The failure algebra.
//!
//! A [`Cause`] records *why* an effect failed without losing information:
//!
//! - `Expected`: a typed domain error raised on purpose
//! - `Unexpected`: a [`Defect`] (a caught panic or an internal invariant break)
//! - `Interrupted`: cooperative cancellation requested by some fiber
//! - `Sequential` / `Concurrent`: two causes observed one after the other, or
//!   from logically parallel branches
//! - `Traced`: a diagnostic label that does not change meaning
//!
//! [`Cause::combine`] is the only way composite causes are built. `Empty` is
//! its identity and it is associative, so causes form a monoid. Equality is
//! semantic: sequential chains are compared flattened (with `Empty` removed)
//! and concurrent branches are compared as a multiset.

use super::id::{FiberId, Time};
use core::fmt;
use std::any::Any;
use std::borrow::Cow;

/// A trace or diagnostic label.
pub type Label = Cow<'static, str>;

/// An unexpected failure: a caught panic or a broken internal invariant.
///
/// Defects are never type-checked; they only carry a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a new defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a defect from a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// The full reason an effect failed.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// No failure. Identity of [`Cause::combine`].
    Empty,
    /// A typed domain error.
    Expected {
        /// Unix time the failure was observed.
        time: Time,
        /// The error value.
        error: E,
    },
    /// A defect.
    Unexpected {
        /// Unix time the failure was observed.
        time: Time,
        /// What went wrong.
        defect: Defect,
    },
    /// Cancellation requested by `fiber_id`.
    Interrupted {
        /// Unix time the request was made.
        time: Time,
        /// The requesting fiber.
        fiber_id: FiberId,
    },
    /// The first cause, then additionally the second.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Causes from two parallel branches (order is not significant).
    Concurrent(Box<Cause<E>>, Box<Cause<E>>),
    /// A labelled cause.
    Traced(Box<Cause<E>>, Label),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// An expected failure.
    #[must_use]
    pub const fn expected(time: Time, error: E) -> Self {
        Self::Expected { time, error }
    }

    /// An unexpected failure.
    #[must_use]
    pub fn unexpected(time: Time, defect: Defect) -> Self {
        Self::Unexpected { time, defect }
    }

    /// An interruption requested by `fiber_id`.
    #[must_use]
    pub const fn interrupted(time: Time, fiber_id: FiberId) -> Self {
        Self::Interrupted { time, fiber_id }
    }

    /// `left` then `right`, without the `Empty` shortcut of [`Cause::combine`].
    #[must_use]
    pub fn sequential(left: Self, right: Self) -> Self {
        Self::Sequential(Box::new(left), Box::new(right))
    }

    /// Causes from two parallel branches.
    #[must_use]
    pub fn concurrent(left: Self, right: Self) -> Self {
        Self::Concurrent(Box::new(left), Box::new(right))
    }

    /// Wraps this cause in a label.
    #[must_use]
    pub fn traced(self, label: impl Into<Label>) -> Self {
        Self::Traced(Box::new(self), label.into())
    }

    /// Monoidal combination: `Empty` on either side yields the other side,
    /// otherwise the result is `Sequential(self, other)`.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Empty, other) => other,
            (this, Self::Empty) => this,
            (this, other) => Self::sequential(this, other),
        }
    }

    /// Returns true if this is exactly `Empty`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true if any leaf is an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        !self.interruptors().is_empty()
    }

    /// Returns true if there is at least one interruption and nothing else.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let mut interrupted = false;
        let mut other = false;
        self.for_each_leaf(&mut |leaf| match leaf {
            Self::Interrupted { .. } => interrupted = true,
            _ => other = true,
        });
        interrupted && !other
    }

    /// Returns every expected error, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| {
            if let Self::Expected { error, .. } = leaf {
                out.push(error);
            }
        });
        out
    }

    /// Returns every defect, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| {
            if let Self::Unexpected { defect, .. } = leaf {
                out.push(defect);
            }
        });
        out
    }

    /// Returns every interrupting fiber, left to right.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| {
            if let Self::Interrupted { fiber_id, .. } = leaf {
                out.push(*fiber_id);
            }
        });
        out
    }

    /// Maps every expected error, preserving structure.
    #[must_use]
    pub fn map<E2>(self, mut f: impl FnMut(E) -> E2) -> Cause<E2> {
        self.map_with(&mut |error| Ok(f(error)))
    }

    /// Maps every expected error; an `Err` turns that leaf into a defect
    /// observed at the same time.
    pub(crate) fn map_or_defect<E2>(
        self,
        mut f: impl FnMut(E) -> Result<E2, Defect>,
    ) -> Cause<E2> {
        self.map_with(&mut f)
    }

    fn map_with<E2>(self, f: &mut impl FnMut(E) -> Result<E2, Defect>) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Expected { time, error } => match f(error) {
                Ok(error) => Cause::Expected { time, error },
                Err(defect) => Cause::Unexpected { time, defect },
            },
            Self::Unexpected { time, defect } => Cause::Unexpected { time, defect },
            Self::Interrupted { time, fiber_id } => Cause::Interrupted { time, fiber_id },
            Self::Sequential(left, right) => {
                let left = left.map_with(f);
                Cause::sequential(left, right.map_with(f))
            }
            Self::Concurrent(left, right) => {
                let left = left.map_with(f);
                Cause::concurrent(left, right.map_with(f))
            }
            Self::Traced(cause, label) => Cause::Traced(Box::new(cause.map_with(f)), label),
        }
    }

    fn for_each_leaf<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        match self {
            Self::Empty => {}
            Self::Sequential(left, right) | Self::Concurrent(left, right) => {
                left.for_each_leaf(visit);
                right.for_each_leaf(visit);
            }
            Self::Traced(cause, _) => cause.for_each_leaf(visit),
            leaf => visit(leaf),
        }
    }

    /// Flattens sequential structure, dropping `Empty`.
    fn sequence_items(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        self.push_sequence_items(&mut out);
        out
    }

    fn push_sequence_items<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match self {
            Self::Empty => {}
            Self::Sequential(left, right) => {
                left.push_sequence_items(out);
                right.push_sequence_items(out);
            }
            Self::Concurrent(..) => {
                let branches = self.parallel_items();
                match branches.as_slice() {
                    [] => {}
                    [single] => single.push_sequence_items(out),
                    _ => out.push(self),
                }
            }
            leaf => out.push(leaf),
        }
    }

    /// Flattens concurrent structure, dropping `Empty`.
    fn parallel_items(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        self.push_parallel_items(&mut out);
        out
    }

    fn push_parallel_items<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match self {
            Self::Empty => {}
            Self::Concurrent(left, right) => {
                left.push_parallel_items(out);
                right.push_parallel_items(out);
            }
            other => out.push(other),
        }
    }
}

impl<E: PartialEq> Cause<E> {
    fn item_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Expected { time: t1, error: e1 },
                Self::Expected { time: t2, error: e2 },
            ) => t1 == t2 && e1 == e2,
            (
                Self::Unexpected { time: t1, defect: d1 },
                Self::Unexpected { time: t2, defect: d2 },
            ) => t1 == t2 && d1 == d2,
            (
                Self::Interrupted {
                    time: t1,
                    fiber_id: f1,
                },
                Self::Interrupted {
                    time: t2,
                    fiber_id: f2,
                },
            ) => t1 == t2 && f1 == f2,
            (Self::Traced(c1, l1), Self::Traced(c2, l2)) => l1 == l2 && c1 == c2,
            (Self::Concurrent(..), Self::Concurrent(..)) => {
                let left = self.parallel_items();
                let mut right: Vec<Option<&Self>> =
                    other.parallel_items().into_iter().map(Some).collect();
                left.len() == right.len()
                    && left.iter().all(|item| {
                        right
                            .iter_mut()
                            .find(|slot| slot.is_some_and(|candidate| *item == candidate))
                            .and_then(Option::take)
                            .is_some()
                    })
            }
            _ => false,
        }
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        let left = self.sequence_items();
        let right = other.sequence_items();
        left.len() == right.len() && left.iter().zip(&right).all(|(a, b)| a.item_eq(b))
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Expected { time, error } => write!(f, "Expected({error:?}) at {time}"),
            Self::Unexpected { time, defect } => write!(f, "Unexpected({defect}) at {time}"),
            Self::Interrupted { time, fiber_id } => {
                write!(f, "Interrupted by {fiber_id} at {time}")
            }
            Self::Sequential(left, right) => write!(f, "({left} then {right})"),
            Self::Concurrent(left, right) => write!(f, "({left} | {right})"),
            Self::Traced(cause, label) => write!(f, "{cause} [{label}]"),
        }
    }
}

/// A failed run surfaced as a Rust error, carrying the full cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("effect failed: {cause}")]
pub struct CauseError<E: fmt::Debug + 'static> {
    cause: Cause<E>,
}

impl<E: fmt::Debug + 'static> CauseError<E> {
    /// Wraps a cause.
    #[must_use]
    pub const fn new(cause: Cause<E>) -> Self {
        Self { cause }
    }

    /// Borrows the cause.
    #[must_use]
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Unwraps the cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

impl<E: fmt::Debug + 'static> From<Cause<E>> for CauseError<E> {
    fn from(cause: Cause<E>) -> Self {
        Self::new(cause)
    }
}
