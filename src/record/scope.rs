//! Resource scopes.
//!
//! A [`Scope`] collects finalizers while a resource-holding region runs and
//! releases them when the scope is closed with the region's exit. Finalizers
//! run last-in first-out. A failing finalizer never hides an earlier failure:
//! every finalizer cause is appended to the scope's final exit.

use crate::effect::Effect;
use crate::sync::Disposable;
use crate::tracing_compat::debug;
use crate::types::{Exit, RuntimeFlags};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Finalizer<E> = Rc<dyn Fn(&Exit<E, ()>) -> Effect<E, ()>>;

struct ScopeState<E> {
    finalizers: Vec<(u64, Finalizer<E>)>,
    next_key: u64,
    exit: Option<Exit<E, ()>>,
    closed: bool,
}

/// A set of finalizers released together.
pub struct Scope<E> {
    state: Rc<RefCell<ScopeState<E>>>,
}

impl<E> Clone for Scope<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<E: Clone + 'static> Scope<E> {
    /// Creates an open scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ScopeState {
                finalizers: Vec::new(),
                next_key: 0,
                exit: None,
                closed: false,
            })),
        }
    }

    /// Registers `finalizer`, to run with the closing exit.
    ///
    /// If the scope has already finished closing, the finalizer runs right
    /// away and the returned handle does nothing. Otherwise disposing the
    /// handle unregisters the finalizer.
    #[must_use]
    pub fn add_finalizer<E2: 'static>(
        &self,
        finalizer: impl Fn(&Exit<E, ()>) -> Effect<E, ()> + 'static,
    ) -> Effect<E2, Disposable> {
        let state = self.state.clone();
        let finalizer: Finalizer<E> = Rc::new(finalizer);
        Effect::suspend(move || {
            let closed_with = {
                let state = state.borrow();
                if state.closed {
                    state.exit.clone()
                } else {
                    None
                }
            };
            if let Some(exit) = closed_with {
                return finalizer(&exit)
                    .attempt::<E2>()
                    .map(|_| Disposable::none());
            }
            let key = {
                let mut inner = state.borrow_mut();
                let key = inner.next_key;
                inner.next_key += 1;
                inner.finalizers.push((key, finalizer.clone()));
                key
            };
            let weak = Rc::downgrade(&state);
            Effect::of(Disposable::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.borrow_mut().finalizers.retain(|(k, _)| *k != key);
                }
            }))
        })
    }

    /// Closes the scope with `exit`, running every finalizer.
    ///
    /// Succeeds with `false` if the scope was already closed. Closing cannot
    /// be interrupted.
    #[must_use]
    pub fn close<E2: 'static>(&self, exit: Exit<E, ()>) -> Effect<E2, bool> {
        let state = self.state.clone();
        Effect::suspend(move || {
            let finalizers = {
                let mut inner = state.borrow_mut();
                if inner.exit.is_some() {
                    return Effect::of(false);
                }
                inner.exit = Some(exit.clone());
                std::mem::take(&mut inner.finalizers)
            };
            let finalizers: Rc<[Finalizer<E>]> =
                finalizers.into_iter().map(|(_, f)| f).collect();
            let state = state.clone();
            release(finalizers.clone(), finalizers.len(), exit.clone()).map(move |final_exit| {
                let mut inner = state.borrow_mut();
                inner.exit = Some(final_exit);
                inner.closed = true;
                true
            })
        })
        .uninterruptible()
    }

    /// The exit the scope closed with, including finalizer failures.
    #[must_use]
    pub fn exit(&self) -> Option<Exit<E, ()>> {
        self.state.borrow().exit.clone()
    }

    /// Returns true once every finalizer has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of registered finalizers that have not run yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().finalizers.len()
    }

    /// Returns true if no finalizers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + 'static> Default for Scope<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Scope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Scope")
            .field("finalizers", &state.finalizers.len())
            .field("closing", &state.exit.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Runs `finalizers[..remaining]` from the last, folding failures into `exit`.
fn release<E: Clone + 'static, E2: 'static>(
    finalizers: Rc<[Finalizer<E>]>,
    remaining: usize,
    exit: Exit<E, ()>,
) -> Effect<E2, Exit<E, ()>> {
    if remaining == 0 {
        return Effect::of(exit);
    }
    let index = remaining - 1;
    let finalizer = finalizers[index].clone();
    let closing = exit.clone();
    Effect::suspend(move || finalizer(&closing).attempt::<E2>()).flat_map(move |result| {
        let exit = match (exit.clone(), result) {
            (exit, Ok(())) => exit,
            (Ok(()), Err(cause)) => {
                debug!(finalizer = index, "finalizer failed");
                Err(cause)
            }
            (Err(previous), Err(cause)) => {
                debug!(finalizer = index, "finalizer failed after an earlier failure");
                Err(previous.combine(cause))
            }
        };
        release(finalizers.clone(), index, exit)
    })
}

impl<E: Clone + 'static, A: Clone + 'static> Effect<E, A> {
    /// Runs `body` with a fresh [`Scope`] and closes it with the body's exit.
    ///
    /// The body keeps the caller's interruptibility; closing always happens.
    /// A finalizer failure turns a success into a failure and is appended to
    /// an existing failure.
    #[must_use]
    pub fn scoped(body: impl Fn(Scope<E>) -> Self + 'static) -> Self {
        let body = Rc::new(body);
        Effect::<E, RuntimeFlags>::get_runtime_flags().flat_map(move |flags: RuntimeFlags| {
            let scope = Scope::new();
            let closing = scope.clone();
            body(scope)
                .set_interrupt_status(flags.interrupt_status)
                .attempt::<E>()
                .flat_map(move |exit: Exit<E, A>| {
                    let scope = closing.clone();
                    closing
                        .close::<E>(exit.clone().map(|_| ()))
                        .flat_map(move |_| match scope.exit() {
                            Some(Err(cause)) => Effect::from_cause(cause),
                            _ => Effect::from_exit(exit.clone()),
                        })
                })
                .uninterruptible()
        })
    }
}
