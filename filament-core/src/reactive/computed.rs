//! Computed implementation.
//!
//! A [`Computed`] is a derived value: it runs a getter, caches the result,
//! and recomputes only when a dependency it actually read has changed. It is
//! both a subscriber (of its inputs) and a dependency (for whatever reads
//! it), so chains of computeds work without any extra wiring.
//!
//! # Refresh algorithm
//!
//! Reading a computed first tracks it as a dependency of whatever subscriber
//! is currently active, then refreshes:
//!
//! 1. Clean: return the cached value, getter untouched.
//! 2. Dirty: stamp every linked edge unconfirmed, install self as the active
//!    subscriber, run the getter (with the previous value as a hint), cache
//!    the result, prune edges the getter did not touch again, restore the
//!    previous active subscriber.
//!
//! A panicking getter propagates to the caller; the dirty flag stays set so
//! the next read retries instead of caching the failure. The active
//! subscriber slot and dependency lists are restored either way.
//!
//! A mid-evaluation self-read is untracked and serves the previously cached
//! value. During the very first evaluation no cached value exists yet, so
//! [`Computed::get`] serves `T::default()` and [`Computed::try_get`] reports
//! the condition as `None`.
//!
//! # Writes
//!
//! A computed built with a setter forwards writes to it; the setter mutates
//! whichever cells it wraps and propagation follows from those writes. A
//! computed without a setter treats a write as a recoverable usage error:
//! [`Computed::set`] logs a warning and discards the value, and
//! [`Computed::try_set`] reports the same condition as a typed error.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::{DepId, DepRecord};
use super::error::WriteError;
use super::runtime::Runtime;
use super::subscriber::{SubscriberFlags, SubscriberId, SubscriberKind, SubscriberRecord};

type Getter<T> = Box<dyn Fn(Option<&T>) -> T + Send + Sync>;
type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

/// A cached derived value that recomputes only when dependencies change.
///
/// Cheap to clone; clones share the cache and graph records.
///
/// `T: PartialEq` lets the engine detect recomputations that produce an
/// unchanged value, so downstream edge stamps stay meaningful.
pub struct Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    runtime: Runtime,
    sub: SubscriberId,
    dep: DepId,
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: RwLock<Option<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: &Runtime, getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let sub = SubscriberId::new();
        let dep = DepId::new();
        {
            let mut graph = runtime.graph();
            // Born dirty, and one behind the global version so the first
            // read cannot hit the nothing-has-changed fast path.
            let last_seen = graph.global_version.wrapping_sub(1);
            graph.subs.insert(
                sub,
                SubscriberRecord::new(
                    SubscriberFlags::TRACKING | SubscriberFlags::DIRTY,
                    last_seen,
                    SubscriberKind::Computed { dep },
                ),
            );
            graph.deps.insert(dep, DepRecord::new(Some(sub)));
        }
        Self {
            inner: Arc::new(ComputedInner {
                runtime: runtime.clone(),
                sub,
                dep,
                getter,
                setter,
                value: RwLock::new(None),
            }),
        }
    }

    /// Get this computed's subscriber ID.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.sub
    }

    /// Get this computed's dependency record ID.
    pub fn dep_id(&self) -> DepId {
        self.inner.dep
    }

    /// Get the current value, recomputing first if a dependency changed.
    ///
    /// Also registers this computed as a dependency of the active subscriber,
    /// so computed-of-computed chains track correctly.
    ///
    /// A self-read from inside this computed's own getter is untracked and
    /// serves the previously cached value; during the very first evaluation
    /// there is none, so the default is served instead. Use
    /// [`Computed::try_get`] to observe that condition explicitly.
    pub fn get(&self) -> T
    where
        T: Default,
    {
        self.try_get().unwrap_or_default()
    }

    /// Get the current value, recomputing first if a dependency changed.
    ///
    /// Returns `None` only when called from inside this computed's own
    /// getter during its first evaluation, before any value has been cached.
    pub fn try_get(&self) -> Option<T> {
        let edge = self.inner.runtime.track_dep(self.inner.dep);
        self.refresh();
        if let Some(edge_id) = edge {
            let mut graph = self.inner.runtime.graph();
            if let Some(version) = graph.deps.get(&self.inner.dep).map(|d| d.version) {
                if let Some(e) = graph.edges.get_mut(&edge_id) {
                    e.stamp = Some(version);
                }
            }
        }
        self.inner.value.read().clone()
    }

    /// Get the cached value, if any, without tracking and without
    /// recomputing.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.read().clone()
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner
            .runtime
            .graph()
            .subs
            .get(&self.inner.sub)
            .is_some_and(|s| s.flags.contains(SubscriberFlags::DIRTY))
    }

    /// Write through the setter, if one was supplied.
    ///
    /// Without a setter this is a recoverable usage error, not a crash: the
    /// write is logged and discarded so it cannot interrupt a host
    /// application's render pass. Use [`Computed::try_set`] to handle the
    /// condition explicitly.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            tracing::warn!(%err, "discarding write to read-only computed");
        }
    }

    /// Write through the setter, or report that this computed is read-only.
    pub fn try_set(&self, value: T) -> Result<(), WriteError> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(WriteError::ReadOnly),
        }
    }

    /// Recompute if dirty. See the module docs for the full algorithm.
    fn refresh(&self) {
        let prev_active = {
            let mut graph = self.inner.runtime.graph();
            let global = graph.global_version;
            let Some(record) = graph.subs.get_mut(&self.inner.sub) else {
                return;
            };
            // Mid-evaluation self-read: untracked no-op, serve the cache.
            if record.flags.contains(SubscriberFlags::RUNNING) {
                return;
            }
            // Nothing anywhere has changed since the last evaluation.
            if record.last_seen_global == global {
                return;
            }
            if !record.flags.contains(SubscriberFlags::DIRTY) {
                record.last_seen_global = global;
                return;
            }
            record.flags.insert(SubscriberFlags::RUNNING);
            graph.prepare_deps(self.inner.sub);
            graph.active.replace(self.inner.sub)
        };

        // The scope restores the active slot, prunes unconfirmed edges, and
        // clears RUNNING whether or not the getter panics; DIRTY is cleared
        // only once a value has actually been produced.
        let mut scope = RefreshScope {
            runtime: &self.inner.runtime,
            sub: self.inner.sub,
            prev_active,
            outcome: None,
        };

        let previous = self.inner.value.read().clone();
        let next = (self.inner.getter)(previous.as_ref());
        let changed = previous.as_ref() != Some(&next);
        *self.inner.value.write() = Some(next);
        scope.outcome = Some(changed);
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("sub", &self.inner.sub)
            .field("dep", &self.inner.dep)
            .field("dirty", &self.is_dirty())
            .field("value", &self.peek())
            .finish()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        graph.remove_subscriber(self.sub);
        graph.remove_dep_record(self.dep);
    }
}

/// Exception-safe tail of a refresh: runs under the graph lock on drop.
struct RefreshScope<'a> {
    runtime: &'a Runtime,
    sub: SubscriberId,
    prev_active: Option<SubscriberId>,
    /// `Some(value_changed)` once the getter returned normally.
    outcome: Option<bool>,
}

impl Drop for RefreshScope<'_> {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        graph.cleanup_deps(self.sub);
        graph.active = self.prev_active;

        let global = graph.global_version;
        let mut bump = None;
        if let Some(record) = graph.subs.get_mut(&self.sub) {
            record.flags.remove(SubscriberFlags::RUNNING);
            if let Some(changed) = self.outcome {
                record
                    .flags
                    .remove(SubscriberFlags::DIRTY | SubscriberFlags::NOTIFIED);
                record.last_seen_global = global;
                if changed {
                    if let SubscriberKind::Computed { dep } = record.kind {
                        bump = Some(dep);
                    }
                }
            }
        }
        // A changed result counts as a write to this computed's own record,
        // but subscribers were already notified eagerly, so no cascade here.
        if let Some(dep_id) = bump {
            if let Some(dep) = graph.deps.get_mut(&dep_id) {
                dep.version += 1;
            }
        }
    }
}

impl Runtime {
    /// Create a derived value from a getter.
    ///
    /// The getter is not run immediately; it runs on first read.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, Box::new(move |_| getter()), None)
    }

    /// Create a derived value whose getter receives the previously cached
    /// value as a hint (`None` on the first run).
    pub fn computed_with_prev<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(Option<&T>) -> T + Send + Sync + 'static,
    {
        Computed::new(self, Box::new(getter), None)
    }

    /// Create a writable derived value. Writes go through `setter`, which is
    /// responsible for mutating whatever upstream cells it wraps.
    pub fn writable_computed<T, F, S>(&self, getter: F, setter: S) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Computed::new(self, Box::new(move |_| getter()), Some(Box::new(setter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::OnceLock;

    #[test]
    fn computes_on_first_read_only() {
        let rt = Runtime::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let c = rt.computed(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.get(), 42);
        assert_eq!(c.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn starts_dirty_and_cleans_after_read() {
        let rt = Runtime::new();
        let c = rt.computed(|| 1);
        assert!(c.is_dirty());
        assert_eq!(c.peek(), None);

        c.get();
        assert!(!c.is_dirty());
        assert_eq!(c.peek(), Some(1));
    }

    #[test]
    fn recomputes_after_dependency_write() {
        let rt = Runtime::new();
        let cell = rt.cell(2);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let cell_clone = cell.clone();

        let c = rt.computed(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            cell_clone.get() * 2
        });

        assert_eq!(c.get(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cell.set(5);
        assert!(c.is_dirty());
        assert_eq!(c.get(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn getter_receives_previous_value() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let cell_clone = cell.clone();

        let c = rt.computed_with_prev(move |prev| {
            let base = cell_clone.get();
            base + prev.copied().unwrap_or(0)
        });

        assert_eq!(c.get(), 1);
        cell.set(10);
        // 10 + previous value 1
        assert_eq!(c.get(), 11);
    }

    #[test]
    fn writable_computed_routes_through_setter() {
        let rt = Runtime::new();
        let cell = rt.cell(3);
        let read_cell = cell.clone();
        let write_cell = cell.clone();

        let c = rt.writable_computed(move || read_cell.get() * 2, move |v| write_cell.set(v / 2));

        assert_eq!(c.get(), 6);
        c.set(10);
        assert_eq!(cell.get(), 5);
        assert_eq!(c.get(), 10);
    }

    #[test]
    fn write_to_readonly_is_discarded() {
        let rt = Runtime::new();
        let c = rt.computed(|| 1);
        assert_eq!(c.get(), 1);

        // Does not panic, does not alter the cache.
        c.set(99);
        assert_eq!(c.get(), 1);
        assert_eq!(c.try_set(99), Err(WriteError::ReadOnly));
    }

    #[test]
    fn panicking_getter_stays_dirty_and_retries() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        let cell_clone = cell.clone();

        let c = rt.computed(move || {
            let v = cell_clone.get();
            if v == 0 {
                panic!("value not ready");
            }
            v * 2
        });

        let c_clone = c.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            c_clone.get();
        }));
        assert!(result.is_err());
        assert!(c.is_dirty());
        // The active slot was restored despite the panic.
        assert!(rt.graph().active.is_none());

        cell.set(4);
        assert_eq!(c.get(), 8);
        assert!(!c.is_dirty());
    }

    #[test]
    fn first_evaluation_self_read_serves_default() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let slot: Arc<OnceLock<Computed<i32>>> = Arc::new(OnceLock::new());

        let cell_clone = cell.clone();
        let slot_clone = slot.clone();
        let c = rt.computed(move || {
            let base = cell_clone.get();
            let me = slot_clone.get().expect("handle installed before first read");
            // Unconditional self-read: must not panic even on the first
            // evaluation, when no cached value exists yet.
            assert_eq!(me.try_get().is_none(), me.peek().is_none());
            base + me.get()
        });
        assert!(slot.set(c.clone()).is_ok());

        assert_eq!(c.get(), 1); // 1 + default 0
        cell.set(4);
        assert_eq!(c.get(), 5); // 4 + previously cached 1
    }

    #[test]
    fn unchanged_result_does_not_bump_own_version() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let cell_clone = cell.clone();
        let c = rt.computed(move || cell_clone.get() / 10);

        assert_eq!(c.get(), 0);
        let v0 = rt.graph().deps[&c.dep_id()].version;

        cell.set(2);
        assert_eq!(c.get(), 0); // still 0, value unchanged
        let v1 = rt.graph().deps[&c.dep_id()].version;
        assert_eq!(v0, v1);

        cell.set(20);
        assert_eq!(c.get(), 2);
        let v2 = rt.graph().deps[&c.dep_id()].version;
        assert_eq!(v2, v1 + 1);
    }

    #[test]
    fn dropping_computed_unlinks_everything() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let cell_clone = cell.clone();
        let c = rt.computed(move || cell_clone.get());
        assert_eq!(c.get(), 1);
        assert_eq!(cell.subscriber_count(), 1);

        drop(c);
        assert_eq!(cell.subscriber_count(), 0);
        assert!(rt.graph().edges.is_empty());
    }
}
