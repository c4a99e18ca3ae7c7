//! Cancellation handles.
//!
//! A [`Disposable`] wraps a release action that runs at most once, no matter
//! how many clones call [`Disposable::dispose`]. A [`SettableDisposable`]
//! groups members and disposes all of them exactly once; members added after
//! the group is disposed are disposed immediately.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

struct DisposeCell {
    action: RefCell<Option<Box<dyn FnOnce()>>>,
    disposed: Cell<bool>,
}

/// A release action that runs at most once.
#[derive(Clone)]
pub struct Disposable {
    cell: Rc<DisposeCell>,
}

impl Disposable {
    /// Wraps a release action.
    #[must_use]
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self::from_action(Some(Box::new(action)))
    }

    /// A handle with nothing to release.
    #[must_use]
    pub fn none() -> Self {
        Self::from_action(None)
    }

    fn from_action(action: Option<Box<dyn FnOnce()>>) -> Self {
        Self {
            cell: Rc::new(DisposeCell {
                action: RefCell::new(action),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Runs the release action if it has not run yet.
    pub fn dispose(&self) {
        self.cell.disposed.set(true);
        let action = self.cell.action.borrow_mut().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cell.disposed.get()
    }
}

impl Default for Disposable {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[derive(Default)]
struct SettableInner {
    members: Vec<(u64, Disposable)>,
    next_key: u64,
    disposed: bool,
}

/// A group of disposables released together exactly once.
#[derive(Clone, Default)]
pub struct SettableDisposable {
    inner: Rc<RefCell<SettableInner>>,
}

impl SettableDisposable {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member.
    ///
    /// Returns a handle that removes the member from the group *without*
    /// disposing it. If the group is already disposed the member is disposed
    /// right away and the returned handle does nothing.
    pub fn add(&self, member: Disposable) -> Disposable {
        let key = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                None
            } else {
                let key = inner.next_key;
                inner.next_key += 1;
                inner.members.push((key, member.clone()));
                Some(key)
            }
        };
        let Some(key) = key else {
            member.dispose();
            return Disposable::none();
        };
        let weak = Rc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().members.retain(|(k, _)| *k != key);
            }
        })
    }

    /// Disposes every member; later calls do nothing.
    pub fn dispose(&self) {
        let members = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            std::mem::take(&mut inner.members)
        };
        for (_, member) in members {
            member.dispose();
        }
    }

    /// Returns true once the group has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Number of live members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().members.len()
    }

    /// Returns true if the group has no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A single handle that disposes the whole group.
    #[must_use]
    pub fn as_disposable(&self) -> Disposable {
        let this = self.clone();
        Disposable::new(move || this.dispose())
    }
}

impl fmt::Debug for SettableDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SettableDisposable")
            .field("members", &inner.members.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counter() -> (Rc<Cell<u32>>, Disposable) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, Disposable::new(move || c.set(c.get() + 1)))
    }

    #[test]
    fn dispose_runs_once_across_clones() {
        init_test("dispose_runs_once_across_clones");
        let (count, d) = counter();
        let other = d.clone();
        d.dispose();
        other.dispose();
        d.dispose();
        crate::assert_with_log!(count.get() == 1, "runs once", 1, count.get());
        crate::assert_with_log!(other.is_disposed(), "shared state", true, false);
        crate::test_complete!("dispose_runs_once_across_clones");
    }

    #[test]
    fn settable_disposes_all_members_once() {
        init_test("settable_disposes_all_members_once");
        let group = SettableDisposable::new();
        let (a, da) = counter();
        let (b, db) = counter();
        group.add(da);
        group.add(db);
        group.dispose();
        group.dispose();
        crate::assert_with_log!(a.get() == 1 && b.get() == 1, "each once", (1, 1), (a.get(), b.get()));
        crate::test_complete!("settable_disposes_all_members_once");
    }

    #[test]
    fn add_after_dispose_disposes_immediately() {
        init_test("add_after_dispose_disposes_immediately");
        let group = SettableDisposable::new();
        group.dispose();
        let (count, d) = counter();
        let handle = group.add(d);
        crate::assert_with_log!(count.get() == 1, "disposed on add", 1, count.get());
        handle.dispose();
        crate::assert_with_log!(group.is_empty(), "nothing retained", 0, group.len());
        crate::test_complete!("add_after_dispose_disposes_immediately");
    }

    #[test]
    fn removal_handle_detaches_without_disposing() {
        init_test("removal_handle_detaches_without_disposing");
        let group = SettableDisposable::new();
        let (count, d) = counter();
        let handle = group.add(d);
        handle.dispose();
        group.dispose();
        crate::assert_with_log!(count.get() == 0, "member detached", 0, count.get());
        crate::test_complete!("removal_handle_detaches_without_disposing");
    }

    #[test]
    fn reentrant_add_during_dispose() {
        init_test("reentrant_add_during_dispose");
        let group = SettableDisposable::new();
        let inner_count = Rc::new(Cell::new(0));
        let g = group.clone();
        let ic = inner_count.clone();
        group.add(Disposable::new(move || {
            let ic = ic.clone();
            g.add(Disposable::new(move || ic.set(ic.get() + 1)));
        }));
        group.dispose();
        crate::assert_with_log!(
            inner_count.get() == 1,
            "late member disposed immediately",
            1,
            inner_count.get()
        );
        crate::test_complete!("reentrant_add_during_dispose");
    }
}
