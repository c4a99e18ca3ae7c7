//! Effects: immutable descriptions of computations.
//!
//! An [`Effect<E, A>`] describes a computation that succeeds with `A`, fails
//! with a typed error `E` or a defect, or is interrupted. Building an effect
//! runs nothing; a [`Runtime`](crate::runtime::Runtime) interprets it as a
//! fiber.
//!
//! Capabilities are read from the fiber's [`Context`] with
//! [`Effect::access`] and overridden for a nested effect with
//! [`Effect::provide`].
//!
//! ```ignore
//! use strand::{Effect, Runtime};
//!
//! let program = Effect::<String, i32>::of(20)
//!     .flat_map(|n| Effect::sync(move || n + 1))
//!     .map(|n| n * 2);
//! let exit = Runtime::new().block_on(program)?;
//! assert_eq!(exit, Ok(42));
//! ```

mod context;
pub mod coroutine;
pub(crate) mod instruction;

pub use context::Context;
pub use coroutine::{Bind, Co};

use crate::fiber::{FiberRefs, FiberScope};
use crate::runtime::RuntimeOptions;
use crate::sync::Future;
use crate::types::{Cause, Defect, Exit, FiberId, Label, RuntimeFlags};
use instruction::{
    cast_value, erase_cause, restore_cause, AnyError, ErasedCause, Failure, Instr, Instruction,
    Node, Value,
};
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// A description of a computation failing with `E` or succeeding with `A`.
pub struct Effect<E, A> {
    pub(crate) instr: Instr,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Effect<E, A> {
    fn clone(&self) -> Self {
        Self {
            instr: self.instr.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Effect<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("instruction", &self.instr.kind.name())
            .field("trace", &self.instr.trace)
            .finish()
    }
}

impl<E: 'static, A: 'static> Effect<E, A> {
    pub(crate) fn from_instr(instr: Instr) -> Self {
        Self {
            instr,
            _marker: PhantomData,
        }
    }

    fn node(kind: Instruction) -> Self {
        Self::from_instr(Node::new(kind))
    }

    /// Succeeds with `value`.
    #[must_use]
    pub fn of(value: A) -> Self
    where
        A: Clone,
    {
        Self::node(Instruction::Of(Rc::new(move || {
            Ok(Box::new(value.clone()) as Value)
        })))
    }

    /// Fails with `cause` unchanged.
    #[must_use]
    pub fn from_cause(cause: Cause<E>) -> Self {
        Self::node(Instruction::FromCause(erase_cause(cause)))
    }

    /// Succeeds or fails as `exit` says.
    #[must_use]
    pub fn from_exit(exit: Exit<E, A>) -> Self
    where
        A: Clone,
    {
        match exit {
            Ok(value) => Self::of(value),
            Err(cause) => Self::from_cause(cause),
        }
    }

    /// Fails with an expected error, stamped with the time it is reached.
    #[must_use]
    pub fn fail(error: E) -> Self {
        let error: AnyError = Rc::new(error);
        Self::node(Instruction::Sync(Rc::new(move || {
            Err(Failure::Expected(error.clone()))
        })))
    }

    /// Fails with a defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        let defect = Defect::new(message);
        Self::node(Instruction::Sync(Rc::new(move || {
            Err(Failure::Unexpected(defect.clone()))
        })))
    }

    /// Runs a side effect each time the effect is reached. A panic becomes a
    /// defect.
    #[must_use]
    pub fn sync(f: impl Fn() -> A + 'static) -> Self {
        Self::node(Instruction::Sync(Rc::new(move || Ok(Box::new(f()) as Value))))
    }

    /// Like [`Effect::sync`], with `Err` mapped to an expected failure.
    #[must_use]
    pub fn try_sync(f: impl Fn() -> Result<A, E> + 'static) -> Self {
        Self::node(Instruction::Sync(Rc::new(move || match f() {
            Ok(value) => Ok(Box::new(value) as Value),
            Err(error) => Err(Failure::Expected(Rc::new(error))),
        })))
    }

    /// Builds the effect lazily, every time it is reached.
    #[must_use]
    pub fn suspend(f: impl Fn() -> Self + 'static) -> Self {
        Self::node(Instruction::Lazy(Rc::new(move || Ok(f().instr))))
    }

    /// Builds the effect from the fiber's current context.
    #[must_use]
    pub fn access(f: impl Fn(&Context) -> Self + 'static) -> Self {
        Self::node(Instruction::AccessContext(Rc::new(move |context: &Context| {
            Ok(f(context).instr)
        })))
    }

    /// Suspends until `future` resolves, then runs its effect.
    #[must_use]
    pub fn wait(future: &Future<E, A>) -> Self {
        future.wait()
    }

    /// Transforms the success value.
    #[must_use]
    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + 'static) -> Effect<E, B> {
        Effect::node(Instruction::Map(
            self.instr,
            Rc::new(move |value: Value| {
                let value = cast_value::<A>(value)?;
                Ok(Box::new(f(value)) as Value)
            }),
        ))
    }

    /// Continues with an effect computed from the success value.
    #[must_use]
    pub fn flat_map<B: 'static>(self, f: impl Fn(A) -> Effect<E, B> + 'static) -> Effect<E, B> {
        Effect::node(Instruction::FlatMap(
            self.instr,
            Rc::new(move |value: Value| Ok(f(cast_value::<A>(value)?).instr)),
        ))
    }

    /// Discards the success value.
    #[must_use]
    pub fn as_unit(self) -> Effect<E, ()> {
        self.map(|_| ())
    }

    /// Runs `self`, then `that`, and pairs the results.
    #[must_use]
    pub fn zip<B: 'static>(self, that: Effect<E, B>) -> Effect<E, (A, B)>
    where
        A: Clone,
    {
        self.flat_map(move |a| that.clone().map(move |b| (a.clone(), b)))
    }

    /// Runs with `context` merged over the current one.
    #[must_use]
    pub fn provide(self, context: Context) -> Self {
        Self::node(Instruction::ProvideContext(self.instr, context))
    }

    /// Runs with `refs` as the fiber-ref store.
    #[must_use]
    pub fn with_fiber_refs(self, refs: FiberRefs) -> Self {
        Self::node(Instruction::WithFiberRefs(self.instr, refs))
    }

    /// Runs with the given interruptibility.
    #[must_use]
    pub fn set_interrupt_status(self, interruptible: bool) -> Self {
        Self::node(Instruction::SetInterruptStatus(self.instr, interruptible))
    }

    /// Runs as a critical section: interruption is deferred until it ends.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        self.set_interrupt_status(false)
    }

    /// Runs interruptibly, even inside a critical section.
    #[must_use]
    pub fn interruptible(self) -> Self {
        self.set_interrupt_status(true)
    }

    /// Runs with the runtime flags transformed by `f`.
    #[must_use]
    pub fn update_runtime_flags(self, f: impl Fn(RuntimeFlags) -> RuntimeFlags + 'static) -> Self {
        Self::node(Instruction::UpdateRuntimeFlags(self.instr, Rc::new(f)))
    }

    /// Attaches a trace label to this node.
    ///
    /// When tracing is on, the label is kept as a frame while the effect runs
    /// and is logged if a failure unwinds through it.
    #[must_use]
    pub fn with_trace(self, label: impl Into<Label>) -> Self {
        let label = label.into();
        match Rc::try_unwrap(self.instr) {
            Ok(node) => Self::from_instr(Rc::new(Node {
                kind: node.kind,
                trace: Some(label),
            })),
            Err(shared) => Self::from_instr(Node::traced(
                Instruction::Lazy(Rc::new(move || Ok(shared.clone()))),
                label,
            )),
        }
    }

    /// Calls `f` when the effect fails for any reason, keeping the cause.
    pub(crate) fn tap_failure(self, f: impl Fn() + 'static) -> Self {
        Self::node(Instruction::MapCause(
            self.instr,
            Rc::new(move |cause: ErasedCause| {
                f();
                cause
            }),
        ))
    }
}

impl<E: Clone + 'static, A: 'static> Effect<E, A> {
    /// Transforms the failure cause.
    #[must_use]
    pub fn map_cause<E2: 'static>(self, f: impl Fn(Cause<E>) -> Cause<E2> + 'static) -> Effect<E2, A> {
        Effect::node(Instruction::MapCause(
            self.instr,
            Rc::new(move |cause: ErasedCause| erase_cause(f(restore_cause::<E>(cause)))),
        ))
    }

    /// Recovers from a failure with an effect computed from its cause.
    #[must_use]
    pub fn flat_map_cause<E2: 'static>(
        self,
        f: impl Fn(Cause<E>) -> Effect<E2, A> + 'static,
    ) -> Effect<E2, A> {
        Effect::node(Instruction::FlatMapCause(
            self.instr,
            Rc::new(move |cause: ErasedCause| Ok(f(restore_cause::<E>(cause)).instr)),
        ))
    }

    /// Folds both outcomes into a new effect.
    #[must_use]
    pub fn match_cause<E2: 'static, B: 'static>(
        self,
        on_cause: impl Fn(Cause<E>) -> Effect<E2, B> + 'static,
        on_value: impl Fn(A) -> Effect<E2, B> + 'static,
    ) -> Effect<E2, B> {
        Effect::node(Instruction::Match(
            self.instr,
            Rc::new(move |cause: ErasedCause| Ok(on_cause(restore_cause::<E>(cause)).instr)),
            Rc::new(move |value: Value| Ok(on_value(cast_value::<A>(value)?).instr)),
        ))
    }

    /// Transforms every expected error.
    #[must_use]
    pub fn map_error<E2: 'static>(self, f: impl Fn(E) -> E2 + 'static) -> Effect<E2, A> {
        self.map_cause(move |cause| cause.map(&f))
    }

    /// Recovers from an expected failure.
    ///
    /// Only causes made purely of expected errors are recovered, using the
    /// first one. Defects and interruptions propagate.
    #[must_use]
    pub fn catch_error(self, f: impl Fn(E) -> Self + 'static) -> Self {
        self.flat_map_cause(move |cause: Cause<E>| {
            let recoverable = cause.defects().is_empty() && !cause.is_interrupted();
            let first = cause.failures().first().map(|error| (*error).clone());
            match first {
                Some(error) if recoverable => f(error),
                _ => Self::from_cause(cause),
            }
        })
    }

    /// Never fails: succeeds with the exit of `self`.
    #[must_use]
    pub fn attempt<E2: 'static>(self) -> Effect<E2, Exit<E, A>> {
        Effect::node(Instruction::Match(
            self.instr,
            Rc::new(|cause: ErasedCause| {
                let exit: Exit<E, A> = Err(restore_cause(cause));
                Ok(Node::once(Box::new(exit) as Value))
            }),
            Rc::new(|value: Value| {
                let exit: Exit<E, A> = Ok(cast_value::<A>(value)?);
                Ok(Node::once(Box::new(exit) as Value))
            }),
        ))
    }

    /// Wraps any failure cause in [`Cause::Traced`] with `label`.
    #[must_use]
    pub fn traced(self, label: impl Into<Label>) -> Self {
        let label = label.into();
        self.map_cause(move |cause| cause.traced(label.clone()))
    }
}

impl<A: 'static> Effect<Infallible, A> {
    /// Reinterprets an infallible effect under any error type.
    #[must_use]
    pub fn widen_error<E2: 'static>(self) -> Effect<E2, A> {
        Effect::from_instr(self.instr)
    }
}

impl<E: 'static> Effect<E, ()> {
    /// Succeeds with `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::of(())
    }
}

impl<E: 'static> Effect<E, RuntimeFlags> {
    /// Reads the current runtime flags.
    #[must_use]
    pub fn get_runtime_flags() -> Self {
        Self::node(Instruction::GetRuntimeFlags)
    }
}

impl<E: 'static> Effect<E, FiberRefs> {
    /// Reads the current fiber-ref store.
    #[must_use]
    pub fn get_fiber_refs() -> Self {
        Self::node(Instruction::GetFiberRefs)
    }
}

impl<E: 'static> Effect<E, RuntimeOptions> {
    /// Reads the options a child forked here would inherit.
    #[must_use]
    pub fn get_runtime_options() -> Self {
        Self::node(Instruction::GetRuntimeOptions)
    }
}

impl<E: 'static> Effect<E, FiberScope> {
    /// Reads the current fiber's scope.
    #[must_use]
    pub fn get_fiber_scope() -> Self {
        Self::node(Instruction::GetFiberScope)
    }
}

impl<E: 'static> Effect<E, FiberId> {
    /// Reads the current fiber's id.
    #[must_use]
    pub fn fiber_id() -> Self {
        Effect::get_fiber_scope().map(|scope: FiberScope| scope.id())
    }
}
