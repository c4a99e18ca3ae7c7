//! Synchronization primitives shared between fibers.
//!
//! Both primitives tolerate re-entrant use: observers and release actions
//! run outside any internal borrow, so they may freely add, dispose or
//! complete while being notified.

pub mod disposable;
pub mod future;

pub use disposable::{Disposable, SettableDisposable};
pub use future::Future;
