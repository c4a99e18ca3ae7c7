//! Runtime builder, the runtime, and its run adapters.

use super::config::{RuntimeConfig, TimeSourceKind};
use super::env_config::apply_env_overrides;
use super::services::DefaultServices;
use super::{RuntimeOptions, RuntimeOverrides};
use crate::effect::{Context, Effect};
use crate::error::Error;
use crate::fiber::runtime::FiberRuntime;
use crate::fiber::{Fiber, FiberRefs, FiberScope};
use crate::time::{system_unix_time, Clock, DriverTimer, TimeSource, TimerDriver, VirtualClock, WallClock};
use crate::tracing_compat::{debug, debug_span, info, warn};
use crate::types::{CauseError, Exit, FiberId, FiberRefId, Time};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

/// Settings made through builder methods. They win over every other source.
#[derive(Debug, Clone, Default)]
struct Explicit {
    time_source: Option<TimeSourceKind>,
    start_time: Option<Time>,
    interruptible: Option<bool>,
    trace: Option<bool>,
}

impl Explicit {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.time_source {
            config.time_source = v;
        }
        if let Some(v) = self.start_time {
            config.start_time = Some(v);
        }
        if let Some(v) = self.interruptible {
            config.interruptible = v;
        }
        if let Some(v) = self.trace {
            config.trace = v;
        }
    }
}

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    explicit: Explicit,
    env_overrides: bool,
    virtual_clock: Option<Arc<VirtualClock>>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            explicit: Explicit::default(),
            env_overrides: false,
            virtual_clock: None,
        }
    }

    /// Start from `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Read time from a virtual clock.
    #[must_use]
    pub fn virtual_time(mut self) -> Self {
        self.explicit.time_source = Some(TimeSourceKind::Virtual);
        self
    }

    /// Read time from the operating system.
    #[must_use]
    pub fn wall_time(mut self) -> Self {
        self.explicit.time_source = Some(TimeSourceKind::Wall);
        self
    }

    /// Share `clock` as the runtime's virtual time source.
    ///
    /// Implies [`RuntimeBuilder::virtual_time`].
    #[must_use]
    pub fn with_virtual_clock(mut self, clock: Arc<VirtualClock>) -> Self {
        self.virtual_clock = Some(clock);
        self.virtual_time()
    }

    /// Set the unix time the runtime clock starts at.
    #[must_use]
    pub fn start_time(mut self, time: Time) -> Self {
        self.explicit.start_time = Some(time);
        self
    }

    /// Set whether root fibers start interruptible.
    #[must_use]
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.explicit.interruptible = Some(interruptible);
        self
    }

    /// Set whether root fibers record trace frames.
    #[must_use]
    pub fn trace(mut self, trace: bool) -> Self {
        self.explicit.trace = Some(trace);
        self
    }

    /// Apply `STRAND_*` environment variables when building.
    ///
    /// They override the base configuration and any config file, but not
    /// builder methods.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.env_overrides = true;
        self
    }

    /// Load the base configuration from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let parsed = super::env_config::parse_toml_file(path.as_ref())?;
        super::env_config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Load the base configuration from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(mut self, toml: &str) -> Result<Self, Error> {
        let parsed = super::env_config::parse_toml_str(toml)?;
        super::env_config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// The configuration [`RuntimeBuilder::build`] would use.
    pub fn resolve(&self) -> Result<RuntimeConfig, Error> {
        let mut config = self.config.clone();
        if self.env_overrides {
            apply_env_overrides(&mut config)?;
        }
        self.explicit.apply(&mut config);
        config.normalize();
        Ok(config)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        let config = self.resolve()?;
        Runtime::from_parts(config, self.virtual_clock)
    }

    /// Deterministic preset: virtual time starting at unix time zero.
    #[must_use]
    pub fn deterministic() -> Self {
        Self::new().virtual_time().start_time(Time::ZERO)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("explicit", &self.explicit)
            .field("env_overrides", &self.env_overrides)
            .field("shared_virtual_clock", &self.virtual_clock.is_some())
            .finish()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    driver: Rc<TimerDriver>,
    virtual_clock: Option<Arc<VirtualClock>>,
    services: DefaultServices,
    options: RuntimeOptions,
}

/// Runs effects as fibers and drives their timers.
///
/// Clones share the timer driver, default services and base options.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// A runtime with the default configuration: wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        let mut config = RuntimeConfig::default();
        config.normalize();
        Self::assemble(config, None)
    }

    /// Shorthand for [`RuntimeBuilder::new`].
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        Self::from_parts(config, None)
    }

    fn from_parts(config: RuntimeConfig, virtual_clock: Option<Arc<VirtualClock>>) -> Result<Self, Error> {
        if virtual_clock.is_some() && config.time_source != TimeSourceKind::Virtual {
            return Err(Error::internal("a shared virtual clock needs virtual time"));
        }
        Ok(Self::assemble(config, virtual_clock))
    }

    fn assemble(config: RuntimeConfig, virtual_clock: Option<Arc<VirtualClock>>) -> Self {
        let (source, virtual_clock): (Arc<dyn TimeSource>, _) = match config.time_source {
            TimeSourceKind::Wall => (Arc::new(WallClock::new()), None),
            TimeSourceKind::Virtual => {
                let clock = virtual_clock.unwrap_or_else(|| Arc::new(VirtualClock::new()));
                (clock.clone(), Some(clock))
            }
        };
        let start_time = config.start_time.unwrap_or_else(system_unix_time);
        let driver = Rc::new(TimerDriver::with_source(source));
        let services = DefaultServices::new(Rc::new(DriverTimer::new(driver.clone(), start_time)));
        let fiber_refs = FiberRefs::new();
        services.install(&fiber_refs);
        let options = RuntimeOptions {
            context: Context::new(),
            scope: FiberScope::root(),
            fiber_refs,
            flags: config.flags(),
        };
        info!(
            time_source = %config.time_source,
            start_time = %start_time,
            interruptible = config.interruptible,
            trace = config.trace,
            "runtime built"
        );
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                driver,
                virtual_clock,
                services,
                options,
            }),
        }
    }

    /// Starts `effect` as a root fiber and calls `callback` exactly once
    /// with its exit.
    ///
    /// The fiber runs eagerly until it completes or first suspends.
    pub fn run_with<E: Clone + 'static, A: 'static>(
        &self,
        effect: Effect<E, A>,
        callback: impl FnOnce(&Exit<E, A>) + 'static,
    ) -> Fiber<E, A> {
        self.run_with_options(effect, RuntimeOverrides::default(), callback)
    }

    /// Like [`Runtime::run_with`], replacing parts of the base options.
    ///
    /// A replacement fiber-ref store without default services gets this
    /// runtime's installed.
    pub fn run_with_options<E: Clone + 'static, A: 'static>(
        &self,
        effect: Effect<E, A>,
        overrides: RuntimeOverrides,
        callback: impl FnOnce(&Exit<E, A>) + 'static,
    ) -> Fiber<E, A> {
        let services = &self.inner.services;
        let id = FiberId::new(services.id_generator.next(), services.clock.unix_time());
        let base = &self.inner.options;
        let fiber_refs = match overrides.fiber_refs {
            Some(refs) => {
                if refs.get_option_by_id::<Context>(FiberRefId::DEFAULT_SERVICES).is_none() {
                    services.install(&refs);
                }
                refs
            }
            None => base.fiber_refs.fork(),
        };
        let options = RuntimeOptions {
            context: overrides.context.unwrap_or_else(|| base.context.clone()),
            scope: overrides.scope.unwrap_or_else(|| FiberScope::new(id)),
            fiber_refs,
            flags: overrides.flags.unwrap_or(base.flags),
        };
        let runtime = FiberRuntime::new(effect, id, options);
        runtime.add_observer(callback);
        runtime.start();
        Fiber::from_runtime(runtime)
    }

    /// Starts `effect` and returns a future of its exit.
    ///
    /// Polling the future fires due timers and, when nothing is due, waits
    /// for the next deadline on the time source. A fiber that suspends with
    /// no timer pending leaves the future pending.
    pub fn run_exit<E: Clone + 'static, A: Clone + 'static>(&self, effect: Effect<E, A>) -> ExitFuture<E, A> {
        let slot = Rc::new(RefCell::new(ExitSlot {
            exit: None,
            waker: None,
        }));
        let sink = slot.clone();
        let fiber = self.run_with(effect, move |exit| {
            let waker = {
                let mut slot = sink.borrow_mut();
                slot.exit = Some(exit.clone());
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });
        ExitFuture {
            runtime: self.clone(),
            fiber: fiber.id(),
            slot,
        }
    }

    /// Starts `effect` and returns a future of its value, failing with the
    /// full cause.
    pub fn run<E: Clone + fmt::Debug + 'static, A: Clone + 'static>(&self, effect: Effect<E, A>) -> RunFuture<E, A> {
        RunFuture {
            exit: self.run_exit(effect),
        }
    }

    /// Runs `effect` to completion on the current thread.
    ///
    /// Fails with [`ErrorKind::Stalled`](crate::error::ErrorKind::Stalled)
    /// if the fiber is suspended while no timer is pending.
    pub fn block_on<E: Clone + 'static, A: Clone + 'static>(&self, effect: Effect<E, A>) -> Result<Exit<E, A>, Error> {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        let fiber = self.run_with(effect, move |exit: &Exit<E, A>| {
            *sink.borrow_mut() = Some(exit.clone());
        });
        let span = debug_span!("block_on", fiber = %fiber.id(), timers_fired = 0u64);
        let mut fired = 0u64;
        loop {
            if let Some(exit) = slot.borrow_mut().take() {
                span.record("timers_fired", fired);
                debug!(fiber = %fiber.id(), timers_fired = fired, "run complete");
                return Ok(exit);
            }
            let before = self.inner.driver.now();
            match self.advance() {
                Some(0) if self.inner.driver.now() == before => {
                    warn!(fiber = %fiber.id(), now = %before, "run stalled: pending timers cannot fire");
                    return Err(Error::stalled(format!(
                        "fiber {} is suspended and time cannot advance past {before}",
                        fiber.id()
                    )));
                }
                Some(n) => fired += n as u64,
                None => {
                    warn!(fiber = %fiber.id(), "run stalled: fiber suspended with no pending timers");
                    return Err(Error::stalled(format!(
                        "fiber {} is suspended with no pending timers",
                        fiber.id()
                    )));
                }
            }
        }
    }

    /// Fires every timer that is due. Returns how many fired.
    pub fn drive(&self) -> usize {
        self.inner.driver.process_timers()
    }

    /// Fires due timers, or waits for the next deadline and fires that.
    ///
    /// Returns `None` if no timer is pending.
    fn advance(&self) -> Option<usize> {
        let fired = self.drive();
        if fired > 0 {
            return Some(fired);
        }
        self.inner.driver.park_and_process()
    }

    /// The default services fibers of this runtime resolve.
    #[must_use]
    pub fn services(&self) -> &DefaultServices {
        &self.inner.services
    }

    /// The options root fibers start from.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Current unix time of the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.services.clock.unix_time()
    }

    /// The virtual clock, when running on virtual time.
    #[must_use]
    pub fn virtual_clock(&self) -> Option<&Arc<VirtualClock>> {
        self.inner.virtual_clock.as_ref()
    }

    /// Number of pending host timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.driver.pending_count()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("driver", &self.inner.driver)
            .finish_non_exhaustive()
    }
}

struct ExitSlot<E, A> {
    exit: Option<Exit<E, A>>,
    waker: Option<Waker>,
}

/// Future returned by [`Runtime::run_exit`].
pub struct ExitFuture<E, A> {
    runtime: Runtime,
    fiber: FiberId,
    slot: Rc<RefCell<ExitSlot<E, A>>>,
}

impl<E, A> ExitFuture<E, A> {
    /// The id of the fiber being awaited.
    #[must_use]
    pub const fn fiber_id(&self) -> FiberId {
        self.fiber
    }
}

impl<E, A> Future for ExitFuture<E, A> {
    type Output = Exit<E, A>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(exit) = this.slot.borrow_mut().exit.take() {
            return Poll::Ready(exit);
        }
        this.slot.borrow_mut().waker = Some(cx.waker().clone());
        if this.runtime.advance().is_some() {
            if let Some(exit) = this.slot.borrow_mut().exit.take() {
                return Poll::Ready(exit);
            }
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

impl<E, A> fmt::Debug for ExitFuture<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitFuture")
            .field("fiber", &self.fiber)
            .field("done", &self.slot.borrow().exit.is_some())
            .finish()
    }
}

/// Future returned by [`Runtime::run`].
pub struct RunFuture<E, A> {
    exit: ExitFuture<E, A>,
}

impl<E: fmt::Debug + 'static, A> Future for RunFuture<E, A> {
    type Output = Result<A, CauseError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.exit)
            .poll(cx)
            .map(|exit| exit.map_err(CauseError::new))
    }
}

impl<E, A> fmt::Debug for RunFuture<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunFuture").field(&self.exit).finish()
    }
}
