//! Strand: a fiber-based effect runtime for Rust.
//!
//! # Overview
//!
//! Programs are built as [`Effect`] values: immutable descriptions of
//! computations that succeed with a value, fail with a typed error or a
//! defect, or are interrupted. A [`Runtime`] interprets an effect as a
//! lightweight fiber on a single-threaded trampoline. Failures keep their
//! full structure as a [`Cause`], so nothing raised during cleanup or in a
//! parallel branch is lost.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: a forked fiber is owned by its parent's
//!   scope and interrupted when the parent finishes
//! - **Interruption is deferred**: uninterruptible regions run to the end
//!   before a pending interruption is delivered
//! - **Lossless failures**: causes combine sequentially and in parallel
//!   instead of overwriting each other
//! - **Deterministic testing**: a virtual clock makes time-driven programs
//!   run instantly and reproducibly
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, time, runtime flags and the cause algebra
//! - [`effect`]: effects, the service context and coroutine-style composition
//! - [`fiber`]: fiber handles, fiber scopes and fiber-local references
//! - [`time`]: clocks, timers, the timeline, the scheduler and schedules
//! - [`sync`]: one-shot futures and disposables
//! - [`record`]: resource scopes with finalizers
//! - [`runtime`]: the runtime, its builder, configuration and default services
//! - [`util`]: internal utilities
//! - [`error`]: runtime-level errors
//! - [`tracing_compat`]: logging with or without the `tracing` crate

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::type_complexity)]

pub mod effect;
pub mod error;
pub mod fiber;
pub mod record;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use effect::{Bind, Co, Context, Effect};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use fiber::{Fiber, FiberRef, FiberRefs, FiberScope, FiberStatus};
pub use record::Scope;
pub use runtime::{
    DefaultServices, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeOptions, RuntimeOverrides,
};
pub use sync::{Disposable, Future};
pub use time::{Clock, Schedule, Scheduler, Timer, VirtualClock};
pub use types::{Cause, CauseError, Defect, Exit, FiberId, FiberRefId, RuntimeFlags, Time};
