//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that reads reactive values and wants to
//! hear about changes to them: computed values track their inputs this way,
//! and external consumers (a render pass, a test harness) participate through
//! the [`Observer`] handle.
//!
//! Subscriber bookkeeping lives in the graph as [`SubscriberRecord`]s, keyed
//! by [`SubscriberId`]. The record owns the head/tail of the subscriber's
//! dependency list; the edges themselves live in the graph's edge table.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use super::dep::{DepId, EdgeId};
use super::runtime::Runtime;

/// Unique identifier for a subscriber.
///
/// Each subscriber (computed value, observer, or other reactive computation)
/// gets a unique ID when created. Uses an atomic counter to ensure uniqueness
/// across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

bitflags! {
    /// State bits for a subscriber.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscriberFlags: u8 {
        /// The subscriber is mid-evaluation. Reads of its own dependency
        /// record while this is set are treated as no-ops.
        const RUNNING = 1 << 1;
        /// The subscriber's reads establish edges. Both computeds and
        /// observers carry this from creation.
        const TRACKING = 1 << 2;
        /// Already queued in the current notification batch. Cleared when
        /// the batch closes.
        const NOTIFIED = 1 << 3;
        /// A dependency changed since the last evaluation; the cached
        /// result (if any) must not be served.
        const DIRTY = 1 << 4;
    }
}

/// What kind of subscriber a record represents.
///
/// The notification walk matches on this to decide whether to cascade: a
/// computed is itself observable, so marking it dirty must propagate into its
/// own dependency record; an observer is a leaf and only gets its callback
/// queued.
pub(crate) enum SubscriberKind {
    /// A computed value. `dep` is the dependency record other subscribers
    /// use to observe it.
    Computed { dep: DepId },
    /// An external consumer. The callback runs when the enclosing batch
    /// closes.
    Observer {
        on_change: Arc<dyn Fn() + Send + Sync>,
    },
}

impl fmt::Debug for SubscriberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Computed { dep } => f.debug_struct("Computed").field("dep", dep).finish(),
            Self::Observer { .. } => f.debug_struct("Observer").finish_non_exhaustive(),
        }
    }
}

/// Per-subscriber state stored in the graph.
#[derive(Debug)]
pub(crate) struct SubscriberRecord {
    pub flags: SubscriberFlags,
    /// Oldest edge in this subscriber's dependency list (read order).
    pub deps_head: Option<EdgeId>,
    /// Most recently read dependency.
    pub deps_tail: Option<EdgeId>,
    /// Global version observed at the last successful evaluation. Lets a
    /// refresh return immediately when nothing anywhere has changed.
    pub last_seen_global: u64,
    pub kind: SubscriberKind,
}

impl SubscriberRecord {
    pub fn new(flags: SubscriberFlags, last_seen_global: u64, kind: SubscriberKind) -> Self {
        Self {
            flags,
            deps_head: None,
            deps_tail: None,
            last_seen_global,
            kind,
        }
    }
}

/// An external subscriber: the integration point for a UI-render bridge or
/// any other consumer that re-evaluates something outside the graph.
///
/// The observer's callback fires (at batch close) whenever a dependency read
/// during the last [`Observer::run`] changes. The callback is expected to
/// schedule a re-run; the engine imposes no scheduling policy of its own.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let cell = rt.cell(1);
/// let obs = Observer::new(&rt, || schedule_render());
/// let shown = obs.run(|| cell.get());
/// cell.set(2); // schedule_render() fires before set() returns
/// ```
pub struct Observer {
    inner: Arc<ObserverInner>,
}

struct ObserverInner {
    runtime: Runtime,
    sub: SubscriberId,
}

impl Observer {
    /// Register a new observer with the given change callback.
    pub fn new<F>(runtime: &Runtime, on_change: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let sub = SubscriberId::new();
        {
            let mut graph = runtime.graph();
            let last_seen = graph.global_version;
            graph.subs.insert(
                sub,
                SubscriberRecord::new(
                    SubscriberFlags::TRACKING,
                    last_seen,
                    SubscriberKind::Observer {
                        on_change: Arc::new(on_change),
                    },
                ),
            );
        }
        Self {
            inner: Arc::new(ObserverInner {
                runtime: runtime.clone(),
                sub,
            }),
        }
    }

    /// Get the observer's subscriber ID.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.sub
    }

    /// Evaluate `f` with this observer installed as the active subscriber.
    ///
    /// Every reactive read inside `f` creates or revalidates an edge to this
    /// observer. Edges from a previous run that `f` does not touch again are
    /// pruned when `f` returns, so the dependency set always mirrors the
    /// latest run. The active-subscriber slot is restored even if `f` panics.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev_active = {
            let mut graph = self.inner.runtime.graph();
            graph.prepare_deps(self.inner.sub);
            graph.active.replace(self.inner.sub)
        };
        let _scope = RunScope {
            runtime: &self.inner.runtime,
            sub: self.inner.sub,
            prev_active,
        };
        f()
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("sub", &self.inner.sub)
            .finish()
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        graph.remove_subscriber(self.sub);
    }
}

/// Restores the active-subscriber slot and prunes unconfirmed edges when an
/// observer run ends, including by panic.
struct RunScope<'a> {
    runtime: &'a Runtime,
    sub: SubscriberId,
    prev_active: Option<SubscriberId>,
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        graph.cleanup_deps(self.sub);
        graph.active = self.prev_active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn observer_run_restores_active_slot() {
        let rt = Runtime::new();
        let obs = Observer::new(&rt, || {});

        assert!(rt.graph().active.is_none());

        obs.run(|| {
            assert_eq!(rt.graph().active, Some(obs.subscriber_id()));
        });

        assert!(rt.graph().active.is_none());
    }

    #[test]
    fn observer_run_restores_on_panic() {
        let rt = Runtime::new();
        let obs = Observer::new(&rt, || {});

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            obs.run(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(rt.graph().active.is_none());
    }

    #[test]
    fn nested_observer_runs() {
        let rt = Runtime::new();
        let outer = Observer::new(&rt, || {});
        let inner = Observer::new(&rt, || {});

        outer.run(|| {
            assert_eq!(rt.graph().active, Some(outer.subscriber_id()));
            inner.run(|| {
                assert_eq!(rt.graph().active, Some(inner.subscriber_id()));
            });
            assert_eq!(rt.graph().active, Some(outer.subscriber_id()));
        });
        assert!(rt.graph().active.is_none());
    }

    #[test]
    fn dropping_observer_removes_record() {
        let rt = Runtime::new();
        let obs = Observer::new(&rt, || {});
        let id = obs.subscriber_id();

        assert!(rt.graph().subs.contains_key(&id));
        drop(obs);
        assert!(!rt.graph().subs.contains_key(&id));
    }
}
