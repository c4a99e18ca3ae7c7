//! Instruction nodes interpreted by the fiber runtime.
//!
//! Values and errors travel through the interpreter type-erased. The typed
//! [`Effect`](super::Effect) API erases on the way in and restores on the way
//! out; a failed restore is a defect.

use crate::effect::Context;
use crate::fiber::FiberRefs;
use crate::sync::future::RawFuture;
use crate::types::{Cause, Defect, Label, RuntimeFlags};
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A success value in flight.
pub(crate) type Value = Box<dyn Any>;

/// An expected error in flight. Shared so causes stay cheap to clone.
pub(crate) type AnyError = Rc<dyn Any>;

pub(crate) type ErasedCause = Cause<AnyError>;

pub(crate) type ErasedExit = Result<Value, ErasedCause>;

/// A shared, immutable instruction node.
pub(crate) type Instr = Rc<Node>;

pub(crate) type OfFn = Rc<dyn Fn() -> Result<Value, Defect>>;
pub(crate) type SyncFn = Rc<dyn Fn() -> Result<Value, Failure>>;
pub(crate) type LazyFn = Rc<dyn Fn() -> Result<Instr, Defect>>;
pub(crate) type MapFn = Rc<dyn Fn(Value) -> Result<Value, Defect>>;
pub(crate) type FlatMapFn = Rc<dyn Fn(Value) -> Result<Instr, Defect>>;
pub(crate) type MapCauseFn = Rc<dyn Fn(ErasedCause) -> ErasedCause>;
pub(crate) type FlatMapCauseFn = Rc<dyn Fn(ErasedCause) -> Result<Instr, Defect>>;
pub(crate) type AccessFn = Rc<dyn Fn(&Context) -> Result<Instr, Defect>>;
pub(crate) type FlagsFn = Rc<dyn Fn(RuntimeFlags) -> RuntimeFlags>;

/// Failure reported by a [`Instruction::Sync`] thunk. The interpreter stamps
/// the time when it turns this into a cause.
pub(crate) enum Failure {
    Expected(AnyError),
    Unexpected(Defect),
}

pub(crate) enum Instruction {
    Of(OfFn),
    FromCause(ErasedCause),
    Sync(SyncFn),
    Lazy(LazyFn),
    Map(Instr, MapFn),
    FlatMap(Instr, FlatMapFn),
    MapCause(Instr, MapCauseFn),
    FlatMapCause(Instr, FlatMapCauseFn),
    Match(Instr, FlatMapCauseFn, FlatMapFn),
    AccessContext(AccessFn),
    ProvideContext(Instr, Context),
    Async(RawFuture),
    SetInterruptStatus(Instr, bool),
    UpdateRuntimeFlags(Instr, FlagsFn),
    GetRuntimeFlags,
    GetFiberRefs,
    WithFiberRefs(Instr, FiberRefs),
    GetRuntimeOptions,
    GetFiberScope,
}

impl Instruction {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Of(_) => "Of",
            Self::FromCause(_) => "FromCause",
            Self::Sync(_) => "Sync",
            Self::Lazy(_) => "Lazy",
            Self::Map(..) => "Map",
            Self::FlatMap(..) => "FlatMap",
            Self::MapCause(..) => "MapCause",
            Self::FlatMapCause(..) => "FlatMapCause",
            Self::Match(..) => "Match",
            Self::AccessContext(_) => "AccessContext",
            Self::ProvideContext(..) => "ProvideContext",
            Self::Async(_) => "Async",
            Self::SetInterruptStatus(..) => "SetInterruptStatus",
            Self::UpdateRuntimeFlags(..) => "UpdateRuntimeFlags",
            Self::GetRuntimeFlags => "GetRuntimeFlags",
            Self::GetFiberRefs => "GetFiberRefs",
            Self::WithFiberRefs(..) => "WithFiberRefs",
            Self::GetRuntimeOptions => "GetRuntimeOptions",
            Self::GetFiberScope => "GetFiberScope",
        }
    }
}

/// An instruction plus its optional trace label.
pub(crate) struct Node {
    pub(crate) kind: Instruction,
    pub(crate) trace: Option<Label>,
}

impl Node {
    pub(crate) fn new(kind: Instruction) -> Instr {
        Rc::new(Self { kind, trace: None })
    }

    pub(crate) fn traced(kind: Instruction, label: Label) -> Instr {
        Rc::new(Self {
            kind,
            trace: Some(label),
        })
    }

    /// An `Of` node that hands out `value` once.
    ///
    /// Only built for continuation results, which the interpreter reaches
    /// exactly once. A second evaluation is a defect.
    pub(crate) fn once(value: Value) -> Instr {
        let slot = RefCell::new(Some(value));
        Self::new(Instruction::Of(Rc::new(move || {
            slot.borrow_mut()
                .take()
                .ok_or_else(|| Defect::new("one-shot value evaluated twice"))
        })))
    }

    pub(crate) fn fail_with(cause: ErasedCause) -> Instr {
        Self::new(Instruction::FromCause(cause))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind.name())
            .field("trace", &self.trace)
            .finish()
    }
}

pub(crate) fn cast_value<A: 'static>(value: Value) -> Result<A, Defect> {
    value.downcast::<A>().map(|boxed| *boxed).map_err(|_| {
        Defect::new(format!(
            "success value is not a {}",
            type_name::<A>()
        ))
    })
}

pub(crate) fn restore_error<E: Clone + 'static>(error: AnyError) -> Result<E, Defect> {
    match error.downcast::<E>() {
        Ok(shared) => Ok(Rc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone())),
        Err(_) => Err(Defect::new(format!(
            "expected error is not a {}",
            type_name::<E>()
        ))),
    }
}

pub(crate) fn erase_cause<E: 'static>(cause: Cause<E>) -> ErasedCause {
    cause.map(|error| Rc::new(error) as AnyError)
}

pub(crate) fn restore_cause<E: Clone + 'static>(cause: ErasedCause) -> Cause<E> {
    cause.map_or_defect(restore_error::<E>)
}
