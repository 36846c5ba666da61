//! Reactive runtime.
//!
//! The [`Runtime`] owns one reactive graph: the dependency records, the
//! subscriber records, the edge table, and the process-wide-style singletons
//! the engine needs (active subscriber slot, tracking flag, batch counter,
//! global version). Holding all of that in an instance rather than true
//! globals means independent graphs can coexist and tests stay deterministic.
//!
//! # Locking
//!
//! The whole graph sits behind a single `parking_lot::Mutex`. Every operation
//! takes the lock briefly for bookkeeping; user closures (computed getters,
//! observer bodies, observer callbacks) are never invoked while the lock is
//! held, so they may freely read and write other reactive values.
//!
//! # Batching
//!
//! Notification cascades run inside a nesting-counted batch scope. Observer
//! callbacks collected during a cascade are deduplicated and invoked
//! synchronously when the counter returns to zero, after the lock is
//! released. [`Runtime::batch`] exposes the counter so several writes can
//! share one callback flush; what a consumer does inside the callback
//! (coalesce, schedule a microtask, rerender) is its own policy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use super::dep::{DepId, DepRecord, Edge, EdgeId};
use super::side_table::OwnerId;
use super::subscriber::{SubscriberFlags, SubscriberId, SubscriberKind, SubscriberRecord};

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// The mutable state of one reactive graph.
pub(crate) struct Graph {
    pub deps: HashMap<DepId, DepRecord>,
    pub subs: HashMap<SubscriberId, SubscriberRecord>,
    pub edges: HashMap<EdgeId, Edge>,
    /// The subscriber currently attributed with reads, if any. A single
    /// slot, not a stack: callers save and restore around evaluations.
    pub active: Option<SubscriberId>,
    /// When false, reads are "peeks" and establish no edges.
    pub tracking_enabled: bool,
    /// Nesting depth of open batch scopes. Always returns to zero.
    pub batch_depth: u32,
    /// Monotonic counter bumped by every accepted write anywhere in the
    /// graph.
    pub global_version: u64,
    /// Subscribers notified in the current batch, in visitation order.
    pub notified: SmallVec<[SubscriberId; 8]>,
    /// Side table: per-owner maps of key to dependency record.
    pub targets: HashMap<OwnerId, indexmap::IndexMap<String, DepId>>,
}

impl Graph {
    fn new() -> Self {
        Self {
            deps: HashMap::new(),
            subs: HashMap::new(),
            edges: HashMap::new(),
            active: None,
            tracking_enabled: true,
            batch_depth: 0,
            global_version: 0,
            notified: SmallVec::new(),
            targets: HashMap::new(),
        }
    }

    /// If no batch scope remains open, take the queued notifications and
    /// return the observer callbacks to invoke (in visitation order). The
    /// caller must release the graph lock before invoking them.
    pub(crate) fn drain_if_unbatched(&mut self) -> SmallVec<[ChangeCallback; 4]> {
        let mut callbacks = SmallVec::new();
        if self.batch_depth != 0 {
            return callbacks;
        }
        let notified = std::mem::take(&mut self.notified);
        for sub_id in notified {
            if let Some(record) = self.subs.get_mut(&sub_id) {
                record.flags.remove(SubscriberFlags::NOTIFIED);
                if let SubscriberKind::Observer { on_change } = &record.kind {
                    callbacks.push(Arc::clone(on_change));
                }
            }
        }
        callbacks
    }
}

/// Handle to one reactive graph. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    graph: Mutex<Graph>,
}

impl Runtime {
    /// Create a new, empty reactive graph.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                graph: Mutex::new(Graph::new()),
            }),
        }
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }

    /// Register the active subscriber (if any) as reading `dep_id`.
    pub(crate) fn track_dep(&self, dep_id: DepId) -> Option<EdgeId> {
        self.graph().track(dep_id)
    }

    /// Accept a write to `dep_id` and run the notification cascade. Observer
    /// callbacks fire before this returns unless a batch scope is open.
    pub(crate) fn trigger_dep(&self, dep_id: DepId) {
        let callbacks = {
            let mut graph = self.graph();
            graph.trigger(dep_id);
            graph.drain_if_unbatched()
        };
        for callback in callbacks {
            callback();
        }
    }

    /// The global version counter: bumped once per accepted write anywhere
    /// in this graph.
    pub fn global_version(&self) -> u64 {
        self.graph().global_version
    }

    /// Run `f` with edge creation disabled, so reads inside it are peeks
    /// that establish no dependencies. Restores the previous tracking state
    /// even if `f` panics.
    pub fn untracked<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = {
            let mut graph = self.graph();
            std::mem::replace(&mut graph.tracking_enabled, false)
        };
        let _guard = TrackingGuard {
            runtime: self,
            prev,
        };
        f()
    }

    /// Run `f` inside a batch scope: notification cascades triggered by
    /// writes inside `f` are counted, and queued observer callbacks fire
    /// once, when the outermost scope closes. Nested calls are fine; the
    /// counter always returns to zero, including when `f` panics (in which
    /// case pending callbacks are discarded rather than run mid-unwind).
    pub fn batch<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.graph().batch_depth += 1;
        let _guard = BatchGuard { runtime: self };
        f()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.graph();
        f.debug_struct("Runtime")
            .field("deps", &graph.deps.len())
            .field("subs", &graph.subs.len())
            .field("edges", &graph.edges.len())
            .field("global_version", &graph.global_version)
            .field("batch_depth", &graph.batch_depth)
            .finish()
    }
}

/// Restores the tracking-enabled flag on scope exit.
struct TrackingGuard<'a> {
    runtime: &'a Runtime,
    prev: bool,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.graph().tracking_enabled = self.prev;
    }
}

/// Closes a batch scope on drop, flushing queued observer callbacks if this
/// was the outermost scope.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let callbacks = {
            let mut graph = self.runtime.graph();
            graph.batch_depth -= 1;
            graph.drain_if_unbatched()
        };
        if !std::thread::panicking() {
            for callback in callbacks {
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_restores_flag() {
        let rt = Runtime::new();
        assert!(rt.graph().tracking_enabled);
        rt.untracked(|| {
            assert!(!rt.graph().tracking_enabled);
        });
        assert!(rt.graph().tracking_enabled);
    }

    #[test]
    fn untracked_nests() {
        let rt = Runtime::new();
        rt.untracked(|| {
            rt.untracked(|| {
                assert!(!rt.graph().tracking_enabled);
            });
            assert!(!rt.graph().tracking_enabled);
        });
        assert!(rt.graph().tracking_enabled);
    }

    #[test]
    fn untracked_restores_on_panic() {
        let rt = Runtime::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.untracked(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(rt.graph().tracking_enabled);
    }

    #[test]
    fn batch_counter_returns_to_zero() {
        let rt = Runtime::new();
        rt.batch(|| {
            assert_eq!(rt.graph().batch_depth, 1);
            rt.batch(|| {
                assert_eq!(rt.graph().batch_depth, 2);
            });
            assert_eq!(rt.graph().batch_depth, 1);
        });
        assert_eq!(rt.graph().batch_depth, 0);
    }

    #[test]
    fn batch_counter_recovers_from_panic() {
        let rt = Runtime::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.batch(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(rt.graph().batch_depth, 0);
    }

    #[test]
    fn clones_share_the_graph() {
        let rt1 = Runtime::new();
        let rt2 = rt1.clone();
        rt1.graph().global_version = 17;
        assert_eq!(rt2.global_version(), 17);
    }
}
