//! Structured-concurrency scopes.
//!
//! Every fiber owns a [`FiberScope`] holding the children it forked. A child
//! leaves its parent's scope on its own, through a completion callback; the
//! child never holds a pointer back to the scope. When the parent's work is
//! done the runtime interrupts and awaits every child still registered.

use crate::effect::Effect;
use crate::sync::{Disposable, Future};
use crate::types::FiberId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// The view of a child fiber a scope needs.
pub(crate) trait ChildFiber {
    fn id(&self) -> FiberId;
    fn interrupt_as(&self, by: FiberId);
    fn on_done(&self, callback: Box<dyn FnOnce()>) -> Disposable;
    fn is_done(&self) -> bool;
}

struct ScopeInner {
    id: FiberId,
    children: RefCell<Vec<(u64, Rc<dyn ChildFiber>)>>,
    next_key: Cell<u64>,
}

/// Registry of the live children of one fiber (or of the runtime root).
#[derive(Clone)]
pub struct FiberScope {
    inner: Rc<ScopeInner>,
}

impl FiberScope {
    /// Creates an empty scope owned by `id`.
    #[must_use]
    pub fn new(id: FiberId) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id,
                children: RefCell::new(Vec::new()),
                next_key: Cell::new(0),
            }),
        }
    }

    /// The root scope for daemon fibers. Owned by no fiber.
    #[must_use]
    pub fn root() -> Self {
        Self::new(FiberId::None)
    }

    /// The owner's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.inner.id
    }

    /// Number of live children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Returns true if no child is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the live children, in registration order.
    #[must_use]
    pub fn children(&self) -> Vec<FiberId> {
        self.inner
            .children
            .borrow()
            .iter()
            .map(|(_, child)| child.id())
            .collect()
    }

    pub(crate) fn add_child(&self, child: Rc<dyn ChildFiber>) {
        if child.is_done() {
            return;
        }
        let key = self.inner.next_key.get();
        self.inner.next_key.set(key + 1);
        self.inner.children.borrow_mut().push((key, child.clone()));
        let scope = Rc::downgrade(&self.inner);
        child.on_done(Box::new(move || {
            if let Some(scope) = scope.upgrade() {
                scope.children.borrow_mut().retain(|(k, _)| *k != key);
            }
        }));
    }

    /// Interrupts every live child, then waits for each to finish.
    ///
    /// All requests are issued before the first wait, so children tear down
    /// side by side.
    #[must_use]
    pub fn interrupt_children<E: 'static>(&self) -> Effect<E, ()> {
        let scope = self.clone();
        Effect::suspend(move || {
            let children: Vec<Rc<dyn ChildFiber>> = scope
                .inner
                .children
                .borrow()
                .iter()
                .map(|(_, child)| child.clone())
                .collect();
            for child in &children {
                child.interrupt_as(scope.id());
            }
            children.into_iter().fold(Effect::unit(), |waits, child| {
                waits.flat_map(move |()| await_done(child.clone()))
            })
        })
    }
}

fn await_done<E: 'static>(child: Rc<dyn ChildFiber>) -> Effect<E, ()> {
    if child.is_done() {
        return Effect::unit();
    }
    let done = Future::<E, ()>::pending();
    let signal = done.clone();
    child.on_done(Box::new(move || {
        signal.complete(Effect::unit());
    }));
    done.wait()
}

impl fmt::Debug for FiberScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberScope")
            .field("id", &self.inner.id)
            .field("children", &self.len())
            .finish()
    }
}
