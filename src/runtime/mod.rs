//! Running effects.
//!
//! This module contains the host-facing machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`env_config`]: `STRAND_*` environment variables and TOML files
//! - [`builder`]: Runtime builder, the runtime, and its run adapters
//! - [`services`]: Default services and their resolution
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder.
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand::{Effect, Runtime};
//!
//! let runtime = Runtime::new();
//! let exit = runtime.block_on(Effect::<String, i32>::of(1).map(|n| n + 1))?;
//! assert_eq!(exit, Ok(2));
//! ```
//!
//! ## Deterministic Time
//!
//! ```ignore
//! use strand::runtime::RuntimeBuilder;
//! use strand::Effect;
//! use std::time::Duration;
//!
//! let runtime = RuntimeBuilder::new().virtual_time().build()?;
//! // Completes instantly: the virtual clock jumps to the deadline.
//! runtime.block_on(Effect::<String, ()>::sleep(Duration::from_secs(3600)))?;
//! ```
//!
//! ## Per-Run Overrides
//!
//! Every run starts from the runtime's [`RuntimeOptions`]. A
//! [`RuntimeOverrides`] replaces individual parts for one run:
//!
//! ```ignore
//! use strand::runtime::RuntimeOverrides;
//!
//! let overrides = RuntimeOverrides::new().with_flags(RuntimeFlags::DEFAULT.with_interrupt_status(false));
//! runtime.run_with_options(effect, overrides, |exit| println!("{exit:?}"));
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod services;

pub use builder::{ExitFuture, RunFuture, Runtime, RuntimeBuilder};
pub use config::{RuntimeConfig, TimeSourceKind};
pub use env_config::ConfigError;
pub use services::{get_default_service, DefaultServices, IdGenerator, RootScope};

use crate::effect::Context;
use crate::fiber::{FiberRefs, FiberScope};
use crate::types::RuntimeFlags;

/// Everything a fiber starts with.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Services reachable with [`Effect::access`](crate::Effect::access).
    pub context: Context,
    /// The fiber's own child registry.
    pub scope: FiberScope,
    /// Fiber-local state.
    pub fiber_refs: FiberRefs,
    /// Initial runtime flags.
    pub flags: RuntimeFlags,
}

/// Replacements for parts of [`RuntimeOptions`] for a single run.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    /// Replaces the context.
    pub context: Option<Context>,
    /// Replaces the root fiber's scope.
    pub scope: Option<FiberScope>,
    /// Replaces the fiber-ref store.
    pub fiber_refs: Option<FiberRefs>,
    /// Replaces the runtime flags.
    pub flags: Option<RuntimeFlags>,
}

impl RuntimeOverrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs with `context`.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Runs with `scope` as the root fiber's scope.
    #[must_use]
    pub fn with_scope(mut self, scope: FiberScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Runs with `fiber_refs`.
    #[must_use]
    pub fn with_fiber_refs(mut self, fiber_refs: FiberRefs) -> Self {
        self.fiber_refs = Some(fiber_refs);
        self
    }

    /// Runs with `flags`.
    #[must_use]
    pub fn with_flags(mut self, flags: RuntimeFlags) -> Self {
        self.flags = Some(flags);
        self
    }
}
