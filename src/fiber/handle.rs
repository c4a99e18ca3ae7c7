//! Fiber handles and forking.

use super::runtime::{FiberRuntime, FiberStatus};
use super::FiberScope;
use crate::effect::Effect;
use crate::runtime::services::{get_default_service, IdGenerator, RootScope};
use crate::runtime::RuntimeOptions;
use crate::sync::{Disposable, Future};
use crate::time::{system_unix_time, Clock};
use crate::tracing_compat::trace;
use crate::types::{Defect, Exit, FiberId};
use std::fmt;
use std::rc::Rc;

/// A handle to a forked or root fiber.
pub struct Fiber<E, A> {
    runtime: Rc<FiberRuntime<E, A>>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
        }
    }
}

impl<E: Clone + 'static, A: 'static> Fiber<E, A> {
    pub(crate) fn from_runtime(runtime: Rc<FiberRuntime<E, A>>) -> Self {
        Self { runtime }
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.runtime.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.runtime.status()
    }

    /// The children this fiber currently owns.
    #[must_use]
    pub fn scope(&self) -> FiberScope {
        self.runtime.scope().clone()
    }

    /// Registers a completion callback, run exactly once with the exit.
    pub fn add_observer(&self, observer: impl FnOnce(&Exit<E, A>) + 'static) -> Disposable {
        self.runtime.add_observer(observer)
    }

    /// Requests interruption on behalf of `by` without waiting.
    pub fn interrupt_as(&self, by: FiberId) {
        self.runtime.interrupt_as(by);
    }
}

impl<E: Clone + 'static, A: Clone + 'static> Fiber<E, A> {
    /// The exit, if the fiber is done.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<E, A>> {
        self.runtime.poll().map(|exit| (*exit).clone())
    }

    /// Waits for the fiber and succeeds with its exit.
    #[must_use]
    pub fn exit<E2: 'static>(&self) -> Effect<E2, Exit<E, A>> {
        let runtime = self.runtime.clone();
        Effect::suspend(move || {
            if let Some(exit) = runtime.poll() {
                return Effect::of((*exit).clone());
            }
            let future = Future::<E2, Exit<E, A>>::pending();
            let resolve = future.clone();
            runtime.add_observer(move |exit| {
                resolve.complete(Effect::of(exit.clone()));
            });
            future.wait()
        })
    }

    /// Waits for the fiber, merges its fiber refs into the caller's, then
    /// succeeds or fails as the fiber did.
    #[must_use]
    pub fn join(&self) -> Effect<E, A> {
        let refs = self.runtime.fiber_refs();
        self.exit::<E>().flat_map(move |exit| {
            refs.inherit::<E>()
                .flat_map(move |()| Effect::from_exit(exit.clone()))
        })
    }

    /// Interrupts the fiber as the current fiber and waits for its exit.
    #[must_use]
    pub fn interrupt<E2: 'static>(&self) -> Effect<E2, Exit<E, A>> {
        let fiber = self.clone();
        Effect::<E2, FiberId>::fiber_id().flat_map(move |by| {
            fiber.interrupt_as(by);
            fiber.exit()
        })
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").finish_non_exhaustive()
    }
}

impl<E: Clone + 'static, A: 'static> Effect<E, A> {
    /// Starts `self` as a child of the current fiber.
    ///
    /// The child inherits the context and runtime flags, starts from a forked
    /// copy of the fiber refs and runs eagerly until it first suspends. It is
    /// interrupted if still running when the parent completes.
    #[must_use]
    pub fn fork<E2: 'static>(self) -> Effect<E2, Fiber<E, A>> {
        self.fork_in(false)
    }

    /// Like [`Effect::fork`], but the child belongs to the runtime's root
    /// scope and may outlive the current fiber.
    #[must_use]
    pub fn fork_daemon<E2: 'static>(self) -> Effect<E2, Fiber<E, A>> {
        self.fork_in(true)
    }

    fn fork_in<E2: 'static>(self, daemon: bool) -> Effect<E2, Fiber<E, A>> {
        Effect::<E2, RuntimeOptions>::get_runtime_options().flat_map(move |options| {
            match spawn(&self, &options, daemon) {
                Ok(fiber) => Effect::of(fiber),
                Err(defect) => Effect::die(defect.message()),
            }
        })
    }
}

fn spawn<E: Clone + 'static, A: 'static>(
    effect: &Effect<E, A>,
    options: &RuntimeOptions,
    daemon: bool,
) -> Result<Fiber<E, A>, Defect> {
    let ids = get_default_service::<Rc<IdGenerator>>(&options.context, &options.fiber_refs)
        .ok_or_else(|| Defect::new("cannot fork: no IdGenerator service"))?;
    let start_time = get_default_service::<Rc<dyn Clock>>(&options.context, &options.fiber_refs)
        .map_or_else(system_unix_time, |clock| clock.unix_time());
    let id = FiberId::new(ids.next(), start_time);
    let parent = if daemon {
        get_default_service::<RootScope>(&options.context, &options.fiber_refs)
            .ok_or_else(|| Defect::new("cannot fork daemon: no root scope"))?
            .0
    } else {
        options.scope.clone()
    };
    let child_options = RuntimeOptions {
        context: options.context.clone(),
        scope: FiberScope::new(id),
        fiber_refs: options.fiber_refs.fork(),
        flags: options.flags,
    };
    let runtime = FiberRuntime::new(effect.clone(), id, child_options);
    parent.add_child(runtime.clone());
    trace!(child = %id, parent = %parent.id(), daemon, "fiber forked");
    runtime.start();
    Ok(Fiber::from_runtime(runtime))
}
