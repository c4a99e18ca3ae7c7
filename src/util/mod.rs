//! Internal utilities.

pub mod stack;

pub use stack::ScopedStack;
