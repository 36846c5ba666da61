//! Cell implementation.
//!
//! A [`Cell`] is the fundamental reactive primitive: a single mutable storage
//! location that knows which computations read it.
//!
//! 1. When a cell is read while a subscriber is active, the cell's
//!    dependency record links an edge to that subscriber.
//!
//! 2. When a cell's value changes, the record's version is bumped and all
//!    subscribers are notified. Writing a value equal to the current one is
//!    a no-op: no version bump, no notification.
//!
//! 3. Notification marks dependent computeds dirty; actual recomputation
//!    waits until the next read of the affected computed.
//!
//! # Thread safety
//!
//! The value sits behind an `RwLock` and graph bookkeeping behind the
//! runtime's mutex, so cells are `Send + Sync`. The engine itself is
//! designed for single-threaded, fully synchronous use; the locks make that
//! contract sound rather than fast.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::{DepId, DepRecord};
use super::runtime::Runtime;

/// A reactive cell holding a value of type `T`.
///
/// Cheap to clone; clones share the same storage and dependency record.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.cell(0);
///
/// let value = count.get(); // tracked read
/// count.set(5);            // notifies subscribers
/// ```
pub struct Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    runtime: Runtime,
    dep: DepId,
    value: RwLock<T>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: &Runtime, value: T) -> Self {
        let dep = DepId::new();
        runtime.graph().deps.insert(dep, DepRecord::new(None));
        Self {
            inner: Arc::new(CellInner {
                runtime: runtime.clone(),
                dep,
                value: RwLock::new(value),
            }),
        }
    }

    /// Get the cell's dependency record ID.
    pub fn dep_id(&self) -> DepId {
        self.inner.dep
    }

    /// Get the current value.
    ///
    /// If a subscriber is active, this also registers the read as a
    /// dependency of that subscriber.
    pub fn get(&self) -> T {
        self.inner.runtime.track_dep(self.inner.dep);
        self.inner.value.read().clone()
    }

    /// Get the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// Writing a value equal to the current one is a no-op: the dependency
    /// version is not bumped and nobody is notified. Otherwise the entire
    /// synchronous notification cascade completes before this returns.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return;
            }
            *guard = value;
        }
        self.inner.runtime.trigger_dep(self.inner.dep);
    }

    /// Update the value using a function of the current value.
    ///
    /// `f` receives a snapshot; no lock is held while it runs, so it may
    /// itself read or write this cell.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.inner.value.read().clone();
        self.set(f(&current));
    }

    /// Get the number of subscribers currently reading this cell.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .graph()
            .deps
            .get(&self.inner.dep)
            .map_or(0, |d| d.sub_count as usize)
    }

    /// The version of this cell's dependency record: the number of accepted
    /// writes so far.
    pub fn version(&self) -> u64 {
        self.inner
            .runtime
            .graph()
            .deps
            .get(&self.inner.dep)
            .map_or(0, |d| d.version)
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("dep", &self.inner.dep)
            .field("value", &self.get_untracked())
            .finish()
    }
}

impl Runtime {
    /// Create a new reactive cell with the given initial value.
    pub fn cell<T>(&self, value: T) -> Cell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Cell::new(self, value)
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        graph.remove_dep_record(self.dep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_get_and_set() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let rt = Runtime::new();
        let cell = rt.cell(10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn reentrant_write_inside_update_does_not_deadlock() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        let cell_clone = cell.clone();

        cell.update(move |v| {
            cell_clone.set(100);
            v + 1
        });

        // The closure saw the snapshot (0); its own write landed first and
        // was then overwritten by the update's result.
        assert_eq!(cell.get(), 1);
        assert_eq!(cell.version(), 2);
    }

    #[test]
    fn equal_write_is_noop() {
        let rt = Runtime::new();
        let cell = rt.cell(7);
        cell.set(7);
        assert_eq!(cell.version(), 0);
        assert_eq!(rt.global_version(), 0);

        cell.set(8);
        assert_eq!(cell.version(), 1);
        assert_eq!(rt.global_version(), 1);

        cell.set(8);
        assert_eq!(cell.version(), 1);
        assert_eq!(rt.global_version(), 1);
    }

    #[test]
    fn version_bumps_by_exactly_one_per_write() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        for i in 1..=5 {
            cell.set(i);
            assert_eq!(cell.version(), i as u64);
        }
    }

    #[test]
    fn cell_clone_shares_state() {
        let rt = Runtime::new();
        let cell1 = rt.cell(0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);

        cell2.set(100);
        assert_eq!(cell1.get(), 100);
    }

    #[test]
    fn dropping_cell_removes_record() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        let dep = cell.dep_id();

        assert!(rt.graph().deps.contains_key(&dep));
        drop(cell);
        assert!(!rt.graph().deps.contains_key(&dep));
    }

    #[test]
    fn untracked_read_creates_no_edge() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let cell2 = cell.clone();
        let c = rt.computed(move || cell2.get_untracked());
        assert_eq!(c.get(), 1);
        assert_eq!(cell.subscriber_count(), 0);
    }
}
