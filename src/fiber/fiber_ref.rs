//! Fiber-local references.

use super::FiberRefs;
use crate::effect::Effect;
use crate::types::FiberRefId;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

type ForkFn<A> = Rc<dyn Fn(&A) -> Option<A>>;
type JoinFn<A> = Rc<dyn Fn(&A, &A) -> A>;

/// A fiber-local slot.
///
/// The value lives in each fiber's [`FiberRefs`] store, keyed by
/// [`FiberRefId`]; the ref itself only carries the identity, the initializer
/// and the inheritance policy:
///
/// - `fork(current)` picks the value a new child starts with. `None` leaves
///   the slot empty in the child, which then runs the initializer on first
///   access. The default copies the value.
/// - `join(current, incoming)` merges a joined child's value into the
///   parent. The default keeps the parent's value.
pub struct FiberRef<E, A> {
    id: FiberRefId,
    initial: Effect<E, A>,
    fork: ForkFn<A>,
    join: JoinFn<A>,
}

impl<E, A> Clone for FiberRef<E, A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            initial: self.initial.clone(),
            fork: self.fork.clone(),
            join: self.join.clone(),
        }
    }
}

impl<E, A> FiberRef<E, A> {
    /// The slot identity.
    #[must_use]
    pub const fn id(&self) -> FiberRefId {
        self.id
    }

    /// The initializer.
    #[must_use]
    pub const fn initial(&self) -> &Effect<E, A> {
        &self.initial
    }
}

impl<E: Clone + 'static, A: Clone + 'static> FiberRef<E, A> {
    /// Creates a ref with a fresh id and the default policies.
    #[must_use]
    pub fn new(name: &'static str, initial: Effect<E, A>) -> Self {
        Self {
            id: FiberRefId::fresh(name),
            initial,
            fork: Rc::new(|current: &A| Some(current.clone())),
            join: Rc::new(|current: &A, _incoming: &A| current.clone()),
        }
    }

    /// Replaces the fork policy.
    #[must_use]
    pub fn with_fork(mut self, fork: impl Fn(&A) -> Option<A> + 'static) -> Self {
        self.fork = Rc::new(fork);
        self
    }

    /// Replaces the join policy.
    #[must_use]
    pub fn with_join(mut self, join: impl Fn(&A, &A) -> A + 'static) -> Self {
        self.join = Rc::new(join);
        self
    }

    /// Re-tags the ref. Refs sharing an id share a slot.
    #[must_use]
    pub fn with_id(mut self, id: FiberRefId) -> Self {
        self.id = id;
        self
    }

    /// Reads the current fiber's value, initializing it on first access.
    #[must_use]
    pub fn get(&self) -> Effect<E, A> {
        let fiber_ref = self.clone();
        Effect::get_fiber_refs().flat_map(move |refs: FiberRefs| refs.get(&fiber_ref))
    }

    /// Sets the current fiber's value.
    #[must_use]
    pub fn set(&self, value: A) -> Effect<E, ()> {
        let fiber_ref = self.clone();
        Effect::get_fiber_refs()
            .map(move |refs: FiberRefs| refs.set(&fiber_ref, value.clone()))
    }

    /// Replaces the current fiber's value with `f(value)`.
    #[must_use]
    pub fn update(&self, f: impl Fn(A) -> A + 'static) -> Effect<E, ()> {
        self.modify(move |current| ((), f(current)))
    }

    /// Replaces the value with the second half of `f(value)` and succeeds
    /// with the first half.
    #[must_use]
    pub fn modify<B: 'static>(&self, f: impl Fn(A) -> (B, A) + 'static) -> Effect<E, B> {
        let fiber_ref = self.clone();
        let f = Rc::new(f);
        Effect::get_fiber_refs().flat_map(move |refs: FiberRefs| {
            let f = f.clone();
            refs.modify(&fiber_ref, move |current| f(current))
        })
    }

    /// Clears the current fiber's value and returns it.
    #[must_use]
    pub fn delete(&self) -> Effect<E, Option<A>> {
        let fiber_ref = self.clone();
        Effect::get_fiber_refs().map(move |refs: FiberRefs| refs.delete(&fiber_ref))
    }

    /// Runs `effect` with the value set to `value`, restoring the previous
    /// state afterwards on every exit path.
    #[must_use]
    pub fn locally<B: Clone + 'static>(&self, value: A, effect: Effect<E, B>) -> Effect<E, B> {
        let fiber_ref = self.clone();
        Effect::get_fiber_refs().flat_map(move |refs: FiberRefs| {
            let previous = refs.get_option(&fiber_ref);
            refs.set(&fiber_ref, value.clone());
            let restore = {
                let (refs, fiber_ref) = (refs.clone(), fiber_ref.clone());
                Rc::new(move || match previous.clone() {
                    Some(previous) => refs.set(&fiber_ref, previous),
                    None => {
                        refs.delete(&fiber_ref);
                    }
                })
            };
            let on_value = restore.clone();
            effect.clone().match_cause(
                move |cause| {
                    restore();
                    Effect::from_cause(cause)
                },
                move |result| {
                    on_value();
                    Effect::of(result)
                },
            )
        })
    }
}

impl<E, A> fmt::Debug for FiberRef<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef").field("id", &self.id).finish()
    }
}

/// Inheritance policy of a ref, over type-erased values.
pub(crate) trait ErasedRef {
    fn fork_value(&self, value: &dyn Any) -> Option<Rc<dyn Any>>;
    fn join_values(&self, current: &dyn Any, incoming: &dyn Any) -> Option<Rc<dyn Any>>;
}

impl<E: 'static, A: Clone + 'static> ErasedRef for FiberRef<E, A> {
    fn fork_value(&self, value: &dyn Any) -> Option<Rc<dyn Any>> {
        let value = value.downcast_ref::<A>()?;
        (self.fork)(value).map(|forked| Rc::new(forked) as Rc<dyn Any>)
    }

    fn join_values(&self, current: &dyn Any, incoming: &dyn Any) -> Option<Rc<dyn Any>> {
        let current = current.downcast_ref::<A>()?;
        let incoming = incoming.downcast_ref::<A>()?;
        Some(Rc::new((self.join)(current, incoming)))
    }
}
