//! Side table: reactivity for data the engine does not own.
//!
//! A deep-reactivity layer (out of scope here) needs somewhere to hang
//! per-property dependency records for arbitrary owner objects without
//! modifying them. The side table is that seam: owners register for an
//! [`Owner`] handle, and [`Runtime::track_key`] / [`Runtime::trigger_key`]
//! attach and fire a dependency record per (owner, key) pair on demand.
//!
//! Rust has no transparent weak-keyed map, so the table prunes
//! deterministically instead: dropping the `Owner` handle removes the
//! owner's entries and unlinks their subscriber edges, guaranteeing the
//! table never outlives what it describes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::dep::{DepId, DepRecord};
use super::runtime::Runtime;

/// Unique identifier for a registered owner object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    /// A property read.
    Get,
    /// An existence check.
    Has,
    /// An iteration over the owner's contents.
    Iterate,
}

/// The kind of mutation being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing property changed.
    Set,
    /// A property was added.
    Add,
    /// A property was removed.
    Delete,
    /// The owner's contents were cleared wholesale; every key fires.
    Clear,
}

/// Registration handle for an owner object in the side table.
///
/// Dropping the handle prunes every dependency record registered under the
/// owner.
pub struct Owner {
    inner: Arc<OwnerInner>,
}

struct OwnerInner {
    runtime: Runtime,
    id: OwnerId,
}

impl Owner {
    /// Get the owner's ID.
    pub fn id(&self) -> OwnerId {
        self.inner.id
    }
}

impl Clone for Owner {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner").field("id", &self.inner.id).finish()
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        let mut graph = self.runtime.graph();
        if let Some(keys) = graph.targets.remove(&self.id) {
            for (_, dep_id) in keys {
                graph.remove_dep_record(dep_id);
            }
        }
    }
}

impl Runtime {
    /// Register an owner object with the side table.
    pub fn owner(&self) -> Owner {
        Owner {
            inner: Arc::new(OwnerInner {
                runtime: self.clone(),
                id: OwnerId::new(),
            }),
        }
    }

    /// Register the active subscriber as reading `key` of `owner`.
    ///
    /// Creates the (owner, key) dependency record on first use. No-op when
    /// no subscriber is active or tracking is disabled, so the table only
    /// grows for keys something actually observes.
    pub fn track_key(&self, owner: &Owner, op: TrackOp, key: impl Into<String>) {
        let mut graph = self.graph();
        if graph.active.is_none() || !graph.tracking_enabled {
            return;
        }
        let key = key.into();
        tracing::trace!(owner = ?owner.id(), ?op, %key, "track key");

        let dep_id = match graph
            .targets
            .get(&owner.inner.id)
            .and_then(|keys| keys.get(&key))
        {
            Some(dep_id) => *dep_id,
            None => {
                let dep_id = DepId::new();
                graph.deps.insert(dep_id, DepRecord::new(None));
                graph
                    .targets
                    .entry(owner.inner.id)
                    .or_default()
                    .insert(key, dep_id);
                dep_id
            }
        };
        graph.track(dep_id);
    }

    /// Fire the dependency record for `key` of `owner`, if one exists.
    ///
    /// `TriggerOp::Clear` ignores `key` and fires every record registered
    /// under the owner, inside one batch scope.
    pub fn trigger_key(&self, owner: &Owner, op: TriggerOp, key: &str) {
        let callbacks = {
            let mut graph = self.graph();
            match op {
                TriggerOp::Clear => {
                    let dep_ids: Vec<DepId> = graph
                        .targets
                        .get(&owner.inner.id)
                        .map(|keys| keys.values().copied().collect())
                        .unwrap_or_default();
                    graph.batch_depth += 1;
                    for dep_id in dep_ids {
                        graph.trigger(dep_id);
                    }
                    graph.batch_depth -= 1;
                }
                TriggerOp::Set | TriggerOp::Add | TriggerOp::Delete => {
                    let dep_id = graph
                        .targets
                        .get(&owner.inner.id)
                        .and_then(|keys| keys.get(key))
                        .copied();
                    if let Some(dep_id) = dep_id {
                        graph.trigger(dep_id);
                    }
                }
            }
            graph.drain_if_unbatched()
        };
        for callback in callbacks {
            callback();
        }
    }
}
