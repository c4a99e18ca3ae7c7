//! Fibers: the interpreter, handles, structured scopes and fiber-local state.
//!
//! A fiber is a lightweight thread of effect execution. Every fiber is driven
//! by a [`FiberRuntime`](runtime::FiberRuntime) trampoline, owns a
//! [`FiberScope`] of the children it forked, and carries a [`FiberRefs`]
//! store of fiber-local values.

mod frame;
mod handle;
mod fiber_ref;
mod fiber_refs;
pub(crate) mod runtime;
mod scope;

pub use fiber_ref::FiberRef;
pub use fiber_refs::FiberRefs;
pub use handle::Fiber;
pub use runtime::FiberStatus;
pub use scope::FiberScope;

pub(crate) use scope::ChildFiber;
