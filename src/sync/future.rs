//! Single-resolution asynchronous values.
//!
//! A [`Future`] starts `Pending` with a list of observers and moves to
//! `Resolved(effect)` exactly once. The first [`Future::complete`] wins; later
//! calls are ignored and reported through the return value. Awaiting a future
//! from an effect ([`Future::wait`]) suspends the fiber until resolution, then
//! continues with the resolved effect.

use crate::effect::instruction::{Instr, Instruction, Node};
use crate::effect::Effect;
use crate::sync::Disposable;
use crate::tracing_compat::debug;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

type Callback = Box<dyn FnOnce(Instr)>;

struct Observer {
    callback: RefCell<Option<Callback>>,
}

enum RawState {
    Pending(Vec<Rc<Observer>>),
    Resolved(Instr),
}

/// Untyped future used by the interpreter.
#[derive(Clone)]
pub(crate) struct RawFuture {
    state: Rc<RefCell<RawState>>,
}

impl RawFuture {
    pub(crate) fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(RawState::Pending(Vec::new()))),
        }
    }

    pub(crate) fn resolved(instr: Instr) -> Self {
        Self {
            state: Rc::new(RefCell::new(RawState::Resolved(instr))),
        }
    }

    pub(crate) fn poll(&self) -> Option<Instr> {
        match &*self.state.borrow() {
            RawState::Pending(_) => None,
            RawState::Resolved(instr) => Some(instr.clone()),
        }
    }

    pub(crate) fn complete(&self, instr: Instr) -> bool {
        let observers = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                RawState::Resolved(_) => return false,
                RawState::Pending(observers) => {
                    let observers = std::mem::take(observers);
                    *state = RawState::Resolved(instr.clone());
                    observers
                }
            }
        };
        for observer in observers {
            let callback = observer.callback.borrow_mut().take();
            if let Some(callback) = callback {
                callback(instr.clone());
            }
        }
        true
    }

    pub(crate) fn add_observer(&self, callback: impl FnOnce(Instr) + 'static) -> Disposable {
        if let Some(instr) = self.poll() {
            callback(instr);
            return Disposable::none();
        }
        let observer = Rc::new(Observer {
            callback: RefCell::new(Some(Box::new(callback))),
        });
        if let RawState::Pending(observers) = &mut *self.state.borrow_mut() {
            observers.push(observer.clone());
        }
        let state = Rc::downgrade(&self.state);
        Disposable::new(move || {
            observer.callback.borrow_mut().take();
            if let Some(state) = state.upgrade() {
                if let RawState::Pending(observers) = &mut *state.borrow_mut() {
                    observers.retain(|o| !Rc::ptr_eq(o, &observer));
                }
            }
        })
    }

    fn observer_count(&self) -> usize {
        match &*self.state.borrow() {
            RawState::Pending(observers) => observers.len(),
            RawState::Resolved(_) => 0,
        }
    }
}

/// A value that resolves once to an effect producing `A` or failing with `E`.
pub struct Future<E, A> {
    raw: RawFuture,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Future<E, A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: 'static, A: 'static> Future<E, A> {
    /// Creates an unresolved future.
    #[must_use]
    pub fn pending() -> Self {
        Self::from_raw(RawFuture::pending())
    }

    /// Creates a future that is already resolved to `effect`.
    #[must_use]
    pub fn resolved(effect: Effect<E, A>) -> Self {
        Self::from_raw(RawFuture::resolved(effect.instr))
    }

    pub(crate) fn from_raw(raw: RawFuture) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn raw(&self) -> &RawFuture {
        &self.raw
    }

    /// Resolves the future and notifies every observer.
    ///
    /// Returns `false` if the future was already resolved; the new effect is
    /// then discarded.
    pub fn complete(&self, effect: Effect<E, A>) -> bool {
        let completed = self.raw.complete(effect.instr);
        if !completed {
            debug!("ignored completion of an already resolved future");
        }
        completed
    }

    /// Registers a callback for resolution.
    ///
    /// Runs synchronously if the future is already resolved. The returned
    /// handle deregisters a callback that has not run yet.
    pub fn add_observer(&self, callback: impl FnOnce(Effect<E, A>) + 'static) -> Disposable {
        self.raw
            .add_observer(move |instr| callback(Effect::from_instr(instr)))
    }

    /// Returns true once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.raw.poll().is_some()
    }

    /// Returns the resolved effect, if any.
    #[must_use]
    pub fn poll(&self) -> Option<Effect<E, A>> {
        self.raw.poll().map(Effect::from_instr)
    }

    /// Number of observers still waiting.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.raw.observer_count()
    }

    /// An effect that suspends until this future resolves, then runs the
    /// resolved effect.
    #[must_use]
    pub fn wait(&self) -> Effect<E, A> {
        Effect::from_instr(Node::new(Instruction::Async(self.raw.clone())))
    }
}

impl<E, A> fmt::Debug for Future<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = matches!(&*self.raw.state.borrow(), RawState::Resolved(_));
        f.debug_struct("Future").field("resolved", &resolved).finish()
    }
}
