//! Default services and their resolution.
//!
//! Every [`Runtime`](super::Runtime) builds one [`DefaultServices`] bundle and
//! installs it, as a [`Context`], in a reserved fiber ref. Collaborators are
//! looked up by type: an explicitly provided context wins, the ambient bundle
//! is the fallback.

use crate::effect::{Context, Effect};
use crate::fiber::{FiberRef, FiberRefs, FiberScope};
use crate::time::{Clock, Scheduler, Timer};
use crate::types::FiberRefId;
use std::cell::Cell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

/// Mints the sequence numbers of fiber ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: Cell<u64>,
}

impl IdGenerator {
    /// A generator whose first id is 0.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// A generator whose first id is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: Cell::new(first),
        }
    }

    /// Returns the next id.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }
}

/// The scope daemon fibers are forked into.
#[derive(Debug, Clone)]
pub struct RootScope(pub FiberScope);

/// The collaborators every fiber can reach.
#[derive(Clone)]
pub struct DefaultServices {
    /// Monotonic and unix time.
    pub clock: Rc<dyn Clock>,
    /// One-shot host timer.
    pub timer: Rc<dyn Timer>,
    /// Delays and repeats.
    pub scheduler: Scheduler,
    /// Fiber id sequence.
    pub id_generator: Rc<IdGenerator>,
    /// Owner of daemon fibers.
    pub root_scope: RootScope,
}

impl DefaultServices {
    /// Bundles the services around `timer`, with a fresh id sequence and
    /// root scope.
    #[must_use]
    pub fn new(timer: Rc<dyn Timer>) -> Self {
        let clock: Rc<dyn Clock> = timer.fork_clock();
        Self {
            clock,
            scheduler: Scheduler::new(timer.clone()),
            timer,
            id_generator: Rc::new(IdGenerator::new()),
            root_scope: RootScope(FiberScope::root()),
        }
    }

    /// The services as a context keyed by their types.
    #[must_use]
    pub fn to_context(&self) -> Context {
        Context::new()
            .add(self.clock.clone())
            .add(self.timer.clone())
            .add(self.scheduler.clone())
            .add(self.id_generator.clone())
            .add(self.root_scope.clone())
    }

    /// The reserved fiber ref holding the ambient services context.
    ///
    /// Reading it in a store where the runtime did not install it is a
    /// defect.
    #[must_use]
    pub fn fiber_ref() -> FiberRef<Infallible, Context> {
        FiberRef::new(
            "DefaultServices",
            Effect::die("default services are not installed"),
        )
        .with_id(FiberRefId::DEFAULT_SERVICES)
    }

    /// Installs the services in `refs`.
    pub fn install(&self, refs: &FiberRefs) {
        refs.set(&Self::fiber_ref(), self.to_context());
    }
}

impl fmt::Debug for DefaultServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultServices")
            .field("unix_time", &self.clock.unix_time())
            .field("scheduler", &self.scheduler)
            .field("id_generator", &self.id_generator)
            .field("root_scope", &self.root_scope)
            .finish()
    }
}

/// Resolves the service of type `S`: `context` first, then the ambient
/// default services in `refs`.
#[must_use]
pub fn get_default_service<S: Clone + 'static>(context: &Context, refs: &FiberRefs) -> Option<S> {
    context.get_cloned::<S>().or_else(|| {
        refs.get_option_by_id::<Context>(FiberRefId::DEFAULT_SERVICES)
            .and_then(|ambient| ambient.get_cloned::<S>())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::{DriverTimer, TimerDriver, VirtualClock};
    use crate::types::Time;
    use std::sync::Arc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn services() -> DefaultServices {
        let driver = Rc::new(TimerDriver::with_source(Arc::new(VirtualClock::new())));
        DefaultServices::new(Rc::new(DriverTimer::new(driver, Time::from_secs(1))))
    }

    #[test]
    fn id_generator_counts_up() {
        init_test("id_generator_counts_up");
        let ids = IdGenerator::starting_at(5);
        let got = [ids.next(), ids.next(), ids.next()];
        crate::assert_with_log!(got == [5, 6, 7], "sequence", [5, 6, 7], got);
        crate::test_complete!("id_generator_counts_up");
    }

    #[test]
    fn explicit_context_wins_over_ambient() {
        init_test("explicit_context_wins_over_ambient");
        let refs = FiberRefs::new();
        services().install(&refs);

        let ambient = get_default_service::<Rc<IdGenerator>>(&Context::new(), &refs)
            .map(|ids| ids.next());
        crate::assert_with_log!(ambient == Some(0), "ambient", Some(0), ambient);

        let explicit = Context::new().add(Rc::new(IdGenerator::starting_at(100)));
        let chosen = get_default_service::<Rc<IdGenerator>>(&explicit, &refs).map(|ids| ids.next());
        crate::assert_with_log!(chosen == Some(100), "explicit", Some(100), chosen);
        crate::test_complete!("explicit_context_wins_over_ambient");
    }

    #[test]
    fn missing_service_resolves_to_none() {
        init_test("missing_service_resolves_to_none");
        let refs = FiberRefs::new();
        let clock = get_default_service::<Rc<dyn Clock>>(&Context::new(), &refs);
        crate::assert_with_log!(clock.is_none(), "nothing installed", true, clock.is_none());
        services().install(&refs);
        let clock = get_default_service::<Rc<dyn Clock>>(&Context::new(), &refs)
            .map(|clock| clock.unix_time());
        crate::assert_with_log!(clock == Some(Time::from_secs(1)), "installed clock", Some(Time::from_secs(1)), clock);
        crate::test_complete!("missing_service_resolves_to_none");
    }
}
