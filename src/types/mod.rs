//! Core types shared by every layer of the runtime.
//!
//! - [`id`]: identifier types (`FiberId`, `FiberRefId`, `Time`)
//! - [`cause`]: the failure algebra (`Cause`, `Defect`, `CauseError`)
//! - [`flags`]: per-fiber runtime flags
//!
//! A fiber's terminal result is an [`Exit`]: `Ok` on success, `Err` carrying
//! the full [`Cause`] otherwise.

pub mod cause;
pub mod flags;
pub mod id;

pub use cause::{Cause, CauseError, Defect, Label};
pub use flags::RuntimeFlags;
pub use id::{FiberId, FiberRefId, Time};

/// The terminal result of an effect: a value or the full cause of failure.
pub type Exit<E, A> = Result<A, Cause<E>>;
