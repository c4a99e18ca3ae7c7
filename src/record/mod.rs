//! Records that outlive a single instruction.
//!
//! - [`scope`]: resource scopes and their finalizers

pub mod scope;

pub use scope::Scope;
