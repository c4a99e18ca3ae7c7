//! Per-fiber storage for [`FiberRef`] values.
//!
//! A store maps each ref id to its current value and remembers the ref that
//! wrote it, so the ref's fork and join policies can be applied without the
//! caller naming every ref again. First access to an empty slot runs the
//! ref's initializer; concurrent first accesses on the same store wait on one
//! shared future, so the initializer runs once and every waiter sees the same
//! outcome.

use super::fiber_ref::{ErasedRef, FiberRef};
use crate::effect::Effect;
use crate::sync::future::RawFuture;
use crate::sync::Future;
use crate::types::{Exit, FiberRefId};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
struct Store {
    values: HashMap<FiberRefId, Rc<dyn Any>>,
    refs: HashMap<FiberRefId, Rc<dyn ErasedRef>>,
    initializing: HashMap<FiberRefId, RawFuture>,
}

/// A fiber's fiber-ref values.
///
/// Clones share the same store.
#[derive(Clone, Default)]
pub struct FiberRefs {
    inner: Rc<RefCell<Store>>,
}

impl FiberRefs {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value, without initializing.
    #[must_use]
    pub fn get_option<E, A: Clone + 'static>(&self, fiber_ref: &FiberRef<E, A>) -> Option<A> {
        self.get_option_by_id(fiber_ref.id())
    }

    pub(crate) fn get_option_by_id<A: Clone + 'static>(&self, id: FiberRefId) -> Option<A> {
        self.inner
            .borrow()
            .values
            .get(&id)
            .and_then(|value| value.downcast_ref::<A>().cloned())
    }

    /// Reads the value, running the initializer if the slot is empty.
    ///
    /// An initializer failure leaves the slot empty; the next access retries.
    #[must_use]
    pub fn get<E: Clone + 'static, A: Clone + 'static>(
        &self,
        fiber_ref: &FiberRef<E, A>,
    ) -> Effect<E, A> {
        let store = self.clone();
        let fiber_ref = fiber_ref.clone();
        Effect::suspend(move || match store.get_option(&fiber_ref) {
            Some(value) => Effect::of(value),
            None => store.initialize(&fiber_ref),
        })
    }

    fn initialize<E: Clone + 'static, A: Clone + 'static>(
        &self,
        fiber_ref: &FiberRef<E, A>,
    ) -> Effect<E, A> {
        let id = fiber_ref.id();
        let in_flight = {
            let mut store = self.inner.borrow_mut();
            store.refs.insert(id, Rc::new(fiber_ref.clone()));
            store.initializing.get(&id).cloned()
        };
        if let Some(raw) = in_flight {
            return Future::<E, A>::from_raw(raw).wait();
        }
        let future = Future::<E, A>::pending();
        self.inner
            .borrow_mut()
            .initializing
            .insert(id, future.raw().clone());
        let store = self.clone();
        let fiber_ref = fiber_ref.clone();
        fiber_ref
            .initial()
            .clone()
            .attempt::<E>()
            .flat_map(move |exit: Exit<E, A>| {
                if let Ok(value) = &exit {
                    store.set(&fiber_ref, value.clone());
                }
                store.inner.borrow_mut().initializing.remove(&id);
                let settled = Effect::from_exit(exit);
                future.complete(settled.clone());
                settled
            })
    }

    /// Sets the value.
    pub fn set<E: 'static, A: Clone + 'static>(&self, fiber_ref: &FiberRef<E, A>, value: A) {
        let mut store = self.inner.borrow_mut();
        store.values.insert(fiber_ref.id(), Rc::new(value));
        store.refs.insert(fiber_ref.id(), Rc::new(fiber_ref.clone()));
    }

    /// Replaces the value with the second half of `f(value)`, initializing
    /// first if needed, and succeeds with the first half.
    #[must_use]
    pub fn modify<E: Clone + 'static, A: Clone + 'static, B: 'static>(
        &self,
        fiber_ref: &FiberRef<E, A>,
        f: impl Fn(A) -> (B, A) + 'static,
    ) -> Effect<E, B> {
        let store = self.clone();
        let target = fiber_ref.clone();
        self.get(fiber_ref).map(move |current| {
            let (result, next) = f(current);
            store.set(&target, next);
            result
        })
    }

    /// Clears the slot and returns the value it held.
    pub fn delete<E: 'static, A: Clone + 'static>(&self, fiber_ref: &FiberRef<E, A>) -> Option<A> {
        let removed = {
            let mut store = self.inner.borrow_mut();
            store.refs.remove(&fiber_ref.id());
            store.values.remove(&fiber_ref.id())
        };
        removed.and_then(|value| value.downcast_ref::<A>().cloned())
    }

    /// Ids of every slot holding a value.
    #[must_use]
    pub fn get_references(&self) -> Vec<FiberRefId> {
        self.inner.borrow().values.keys().copied().collect()
    }

    /// A new store for a child fiber, built by each ref's fork policy.
    #[must_use]
    pub fn fork(&self) -> Self {
        let store = self.inner.borrow();
        let mut forked = Store::default();
        for (id, value) in &store.values {
            let Some(policy) = store.refs.get(id) else {
                forked.values.insert(*id, value.clone());
                continue;
            };
            if let Some(value) = policy.fork_value(value.as_ref()) {
                forked.values.insert(*id, value);
                forked.refs.insert(*id, policy.clone());
            }
        }
        Self {
            inner: Rc::new(RefCell::new(forked)),
        }
    }

    /// Merges this (child) store into `parent` with each ref's join policy.
    ///
    /// Slots missing from the parent are adopted as they are.
    pub fn join_into(&self, parent: &Self) {
        if Rc::ptr_eq(&self.inner, &parent.inner) {
            return;
        }
        let entries: Vec<_> = {
            let store = self.inner.borrow();
            store
                .values
                .iter()
                .map(|(id, value)| (*id, value.clone(), store.refs.get(id).cloned()))
                .collect()
        };
        for (id, incoming, policy) in entries {
            let current = parent.inner.borrow().values.get(&id).cloned();
            let merged = match (&current, &policy) {
                (Some(current), Some(policy)) => policy
                    .join_values(current.as_ref(), incoming.as_ref())
                    .unwrap_or(incoming),
                (Some(current), None) => current.clone(),
                (None, _) => incoming,
            };
            let mut store = parent.inner.borrow_mut();
            store.values.insert(id, merged);
            if let Some(policy) = policy {
                store.refs.entry(id).or_insert(policy);
            }
        }
    }

    /// An effect merging this store into the current fiber's store.
    #[must_use]
    pub fn inherit<E: 'static>(&self) -> Effect<E, ()> {
        let child = self.clone();
        Effect::get_fiber_refs().map(move |parent: FiberRefs| child.join_into(&parent))
    }

    /// Number of slots holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().values.len()
    }

    /// Returns true if no slot holds a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.inner.borrow();
        f.debug_struct("FiberRefs")
            .field("values", &store.values.len())
            .field("initializing", &store.initializing.len())
            .finish()
    }
}
