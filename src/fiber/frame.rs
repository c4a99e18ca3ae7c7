//! Continuation frames.

use crate::effect::instruction::{FlatMapCauseFn, FlatMapFn, MapCauseFn, MapFn};
use crate::types::Label;

/// Which dynamically scoped value a [`Frame::Pop`] restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restore {
    Context,
    FiberRefs,
    Flags,
}

/// A pending continuation on a fiber's stack.
pub(crate) enum Frame {
    /// Success only: transform the value and keep unwinding.
    Map(MapFn),
    /// Success only: continue with a new effect.
    FlatMap(FlatMapFn),
    /// Failure only: transform the cause and keep unwinding.
    MapCause(MapCauseFn),
    /// Failure only: continue with a recovery effect.
    FlatMapCause(FlatMapCauseFn),
    /// Both paths.
    Match {
        on_cause: FlatMapCauseFn,
        on_value: FlatMapFn,
    },
    /// Marks the end of an uninterruptible region. Deferred interruption is
    /// honored when unwinding past it.
    Interrupt,
    /// Restores a dynamically scoped value on either path.
    Pop(Restore),
    /// Diagnostic label; logged when a failure unwinds through it.
    Trace(Label),
}

impl Frame {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Map(_) => "Map",
            Self::FlatMap(_) => "FlatMap",
            Self::MapCause(_) => "MapCause",
            Self::FlatMapCause(_) => "FlatMapCause",
            Self::Match { .. } => "Match",
            Self::Interrupt => "Interrupt",
            Self::Pop(_) => "Pop",
            Self::Trace(_) => "Trace",
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pop(restore) => write!(f, "Pop({restore:?})"),
            Self::Trace(label) => write!(f, "Trace({label})"),
            other => f.write_str(other.name()),
        }
    }
}
