//! Dependency records and edges.
//!
//! A [`DepRecord`] is the observable half of the system: every cell, every
//! computed, and every side-table key owns one. It carries a version counter
//! and the list of subscribers currently reading it.
//!
//! An [`Edge`] is one subscriber-to-dependency relationship. Each edge is
//! threaded through two doubly-linked lists at once: the subscriber's list of
//! everything it reads (in read order) and the dependency's list of
//! everything reading it (in registration order). Rather than raw pointers,
//! edges live in the graph's edge table and the list links are plain
//! [`EdgeId`]s, so there is no shared ownership to untangle when a node goes
//! away.
//!
//! # Tracking protocol
//!
//! Reading a reactive value calls [`Graph::track`], which connects the value's
//! dependency record to the active subscriber. Before a subscriber
//! re-evaluates, [`Graph::prepare_deps`] stamps every existing edge as
//! unconfirmed; reads during the evaluation restamp the edges they touch, and
//! [`Graph::cleanup_deps`] afterwards drops whatever was not touched again.
//! That is how a computed's dependency set shrinks when a branch stops being
//! read.
//!
//! # Notification protocol
//!
//! Writing calls [`Graph::trigger`]: bump the record's version and the global
//! version, then walk the subscriber list from the most recently added edge
//! backwards, marking computeds dirty (and recursing into their own records,
//! depth-first) and queueing observer callbacks for the batch close.

use std::sync::atomic::{AtomicU64, Ordering};

use super::runtime::Graph;
use super::subscriber::{SubscriberFlags, SubscriberId, SubscriberKind};

/// Unique identifier for a dependency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique dependency ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DepId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u64);

impl EdgeId {
    /// Generate a new unique edge ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The observable side of a reactive value.
#[derive(Debug)]
pub(crate) struct DepRecord {
    /// Incremented by exactly one per accepted write.
    pub version: u64,
    /// Cached edge for the currently active subscriber, so repeated reads of
    /// the same value inside one evaluation skip the list search.
    pub active_edge: Option<EdgeId>,
    /// Oldest subscriber edge.
    pub subs_head: Option<EdgeId>,
    /// Most recently added subscriber edge. Notification starts here and
    /// walks backwards.
    pub subs_tail: Option<EdgeId>,
    /// Set when this record belongs to a computed; used both for the
    /// self-dependency guard and for the notification cascade.
    pub owner: Option<SubscriberId>,
    /// Number of edges currently pointing at this record.
    pub sub_count: u32,
}

impl DepRecord {
    pub fn new(owner: Option<SubscriberId>) -> Self {
        Self {
            version: 0,
            active_edge: None,
            subs_head: None,
            subs_tail: None,
            owner,
            sub_count: 0,
        }
    }
}

/// One subscriber-to-dependency relationship.
///
/// Invariant: an edge is linked into exactly one subscriber list and one
/// dependency list, or into neither. The `stamp` records the dependency
/// version at the time of the last confirmed read; `None` means the edge is
/// unconfirmed in the current re-evaluation pass and will be pruned unless
/// revalidated.
#[derive(Debug)]
pub(crate) struct Edge {
    pub sub: SubscriberId,
    pub dep: DepId,
    pub stamp: Option<u64>,
    pub prev_dep: Option<EdgeId>,
    pub next_dep: Option<EdgeId>,
    pub prev_sub: Option<EdgeId>,
    pub next_sub: Option<EdgeId>,
    /// The dependency's previous `active_edge`, saved by `prepare_deps` and
    /// restored by `cleanup_deps` so nested evaluations of the same
    /// dependency do not clobber each other's cache.
    pub prev_active: Option<EdgeId>,
}

impl Graph {
    /// Connect `dep_id` to the active subscriber, creating or revalidating an
    /// edge. Returns the edge, or `None` when no subscriber is active,
    /// tracking is disabled, or the active subscriber is the record's own
    /// computed (self-reads never establish an edge).
    pub(crate) fn track(&mut self, dep_id: DepId) -> Option<EdgeId> {
        let active = self.active?;
        if !self.tracking_enabled {
            return None;
        }
        let record = self.deps.get(&dep_id)?;
        if record.owner == Some(active) {
            return None;
        }

        let current = record
            .active_edge
            .filter(|id| self.edges.get(id).map(|e| e.sub) == Some(active));

        match current {
            None => Some(self.link_edge(dep_id, active)),
            Some(edge_id) => {
                let stale = self.edges.get(&edge_id).is_some_and(|e| e.stamp.is_none());
                if stale {
                    // Revalidate: restamp with the current version and move
                    // to the tail of the subscriber's list, preserving read
                    // order across re-evaluations.
                    let version = self.deps.get(&dep_id).map_or(0, |d| d.version);
                    if let Some(edge) = self.edges.get_mut(&edge_id) {
                        edge.stamp = Some(version);
                    }
                    self.move_edge_to_deps_tail(edge_id, active);
                }
                Some(edge_id)
            }
        }
    }

    /// Create a fresh edge and append it to the tail of both lists.
    fn link_edge(&mut self, dep_id: DepId, sub_id: SubscriberId) -> EdgeId {
        let edge_id = EdgeId::new();
        let version = self.deps.get(&dep_id).map_or(0, |d| d.version);

        let prev_tail = self.subs.get(&sub_id).and_then(|s| s.deps_tail);
        self.edges.insert(
            edge_id,
            Edge {
                sub: sub_id,
                dep: dep_id,
                stamp: Some(version),
                prev_dep: prev_tail,
                next_dep: None,
                prev_sub: None,
                next_sub: None,
                prev_active: None,
            },
        );

        if let Some(sub) = self.subs.get_mut(&sub_id) {
            if sub.deps_head.is_none() {
                sub.deps_head = Some(edge_id);
            }
            sub.deps_tail = Some(edge_id);
        }
        if let Some(tail) = prev_tail {
            if let Some(edge) = self.edges.get_mut(&tail) {
                edge.next_dep = Some(edge_id);
            }
        }

        if let Some(dep) = self.deps.get_mut(&dep_id) {
            dep.active_edge = Some(edge_id);
        }
        self.add_sub(edge_id);
        edge_id
    }

    /// Append an edge to the tail of its dependency's subscriber list.
    fn add_sub(&mut self, edge_id: EdgeId) {
        let Some((dep_id, sub_id)) = self.edges.get(&edge_id).map(|e| (e.dep, e.sub)) else {
            return;
        };
        let tracking = self
            .subs
            .get(&sub_id)
            .is_some_and(|s| s.flags.contains(SubscriberFlags::TRACKING));

        let Some(dep) = self.deps.get_mut(&dep_id) else {
            return;
        };
        dep.sub_count += 1;
        if !tracking {
            return;
        }

        let prev_tail = dep.subs_tail;
        dep.subs_tail = Some(edge_id);
        if dep.subs_head.is_none() {
            dep.subs_head = Some(edge_id);
        }
        if let Some(tail) = prev_tail {
            if let Some(edge) = self.edges.get_mut(&tail) {
                edge.next_sub = Some(edge_id);
            }
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.prev_sub = Some(tail);
            }
        }
    }

    /// Move a revalidated edge to the tail of its subscriber's list.
    fn move_edge_to_deps_tail(&mut self, edge_id: EdgeId, sub_id: SubscriberId) {
        let (prev, next) = match self.edges.get(&edge_id) {
            Some(e) => (e.prev_dep, e.next_dep),
            None => return,
        };
        // Already the tail: nothing to do.
        let Some(next) = next else { return };

        if let Some(edge) = self.edges.get_mut(&next) {
            edge.prev_dep = prev;
        }
        if let Some(p) = prev {
            if let Some(edge) = self.edges.get_mut(&p) {
                edge.next_dep = Some(next);
            }
        }

        let old_tail = self.subs.get(&sub_id).and_then(|s| s.deps_tail);
        if let Some(sub) = self.subs.get_mut(&sub_id) {
            if sub.deps_head == Some(edge_id) {
                sub.deps_head = Some(next);
            }
            sub.deps_tail = Some(edge_id);
        }
        if let Some(edge) = self.edges.get_mut(&edge_id) {
            edge.prev_dep = old_tail;
            edge.next_dep = None;
        }
        if let Some(tail) = old_tail {
            if let Some(edge) = self.edges.get_mut(&tail) {
                edge.next_dep = Some(edge_id);
            }
        }
    }

    /// Accept a write: bump the record's version and the global version, then
    /// notify subscribers.
    pub(crate) fn trigger(&mut self, dep_id: DepId) {
        let Some(dep) = self.deps.get_mut(&dep_id) else {
            return;
        };
        dep.version += 1;
        self.global_version += 1;
        tracing::trace!(dep = dep_id.raw(), global = self.global_version, "trigger");
        self.notify(dep_id);
    }

    /// Walk the subscriber list in reverse registration order, marking
    /// computeds dirty and queueing observer callbacks.
    ///
    /// A computed that becomes dirty propagates into its own dependency
    /// record depth-first, before its siblings at this level are visited.
    /// The walk is bracketed by the batch counter so that queued observer
    /// callbacks fire once, when the outermost scope closes.
    pub(crate) fn notify(&mut self, dep_id: DepId) {
        self.batch_depth += 1;

        let mut cursor = self.deps.get(&dep_id).and_then(|d| d.subs_tail);
        while let Some(edge_id) = cursor {
            let Some((prev, sub_id)) = self.edges.get(&edge_id).map(|e| (e.prev_sub, e.sub)) else {
                break;
            };

            let cascade = match self.subs.get_mut(&sub_id) {
                Some(record) => {
                    let first_notice = !record.flags.contains(SubscriberFlags::NOTIFIED);
                    match record.kind {
                        SubscriberKind::Computed { dep } => {
                            record.flags.insert(SubscriberFlags::DIRTY);
                            if first_notice {
                                record.flags.insert(SubscriberFlags::NOTIFIED);
                                self.notified.push(sub_id);
                                Some(dep)
                            } else {
                                // Everything downstream already heard about
                                // this batch; don't walk it again.
                                None
                            }
                        }
                        SubscriberKind::Observer { .. } => {
                            if first_notice {
                                record.flags.insert(SubscriberFlags::NOTIFIED);
                                self.notified.push(sub_id);
                            }
                            None
                        }
                    }
                }
                None => None,
            };

            if let Some(owned_dep) = cascade {
                self.notify(owned_dep);
            }
            cursor = prev;
        }

        self.batch_depth -= 1;
    }

    /// Stamp every edge of `sub_id` as unconfirmed ahead of a re-evaluation,
    /// and point each dependency's active-edge cache at the edge so reads
    /// during the evaluation find it without a search.
    pub(crate) fn prepare_deps(&mut self, sub_id: SubscriberId) {
        let mut cursor = self.subs.get(&sub_id).and_then(|s| s.deps_head);
        while let Some(edge_id) = cursor {
            let dep_id = match self.edges.get_mut(&edge_id) {
                Some(edge) => {
                    edge.stamp = None;
                    cursor = edge.next_dep;
                    edge.dep
                }
                None => break,
            };
            let displaced = match self.deps.get_mut(&dep_id) {
                Some(dep) => dep.active_edge.replace(edge_id),
                None => None,
            };
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.prev_active = displaced;
            }
        }
    }

    /// Drop every edge of `sub_id` still unconfirmed after a re-evaluation,
    /// restoring each dependency's active-edge cache on the way out.
    pub(crate) fn cleanup_deps(&mut self, sub_id: SubscriberId) {
        let mut tail = self.subs.get(&sub_id).and_then(|s| s.deps_tail);
        let mut head = None;
        let mut cursor = tail;

        while let Some(edge_id) = cursor {
            let Some((prev, dep_id, stale, prev_active)) = self
                .edges
                .get(&edge_id)
                .map(|e| (e.prev_dep, e.dep, e.stamp.is_none(), e.prev_active))
            else {
                break;
            };

            if let Some(dep) = self.deps.get_mut(&dep_id) {
                dep.active_edge = prev_active;
            }
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.prev_active = None;
            }

            if stale {
                if Some(edge_id) == tail {
                    tail = prev;
                }
                self.unlink_edge(edge_id);
            } else {
                head = Some(edge_id);
            }
            cursor = prev;
        }

        if let Some(sub) = self.subs.get_mut(&sub_id) {
            sub.deps_head = head;
            sub.deps_tail = tail;
        }
    }

    /// Remove an edge from both of its lists and from the edge table.
    pub(crate) fn unlink_edge(&mut self, edge_id: EdgeId) {
        let Some(edge) = self.edges.remove(&edge_id) else {
            return;
        };

        // Subscriber-side list.
        if let Some(p) = edge.prev_dep {
            if let Some(e) = self.edges.get_mut(&p) {
                e.next_dep = edge.next_dep;
            }
        }
        if let Some(n) = edge.next_dep {
            if let Some(e) = self.edges.get_mut(&n) {
                e.prev_dep = edge.prev_dep;
            }
        }
        if let Some(sub) = self.subs.get_mut(&edge.sub) {
            if sub.deps_head == Some(edge_id) {
                sub.deps_head = edge.next_dep;
            }
            if sub.deps_tail == Some(edge_id) {
                sub.deps_tail = edge.prev_dep;
            }
        }

        // Dependency-side list.
        if let Some(p) = edge.prev_sub {
            if let Some(e) = self.edges.get_mut(&p) {
                e.next_sub = edge.next_sub;
            }
        }
        if let Some(n) = edge.next_sub {
            if let Some(e) = self.edges.get_mut(&n) {
                e.prev_sub = edge.prev_sub;
            }
        }
        if let Some(dep) = self.deps.get_mut(&edge.dep) {
            if dep.subs_head == Some(edge_id) {
                dep.subs_head = edge.next_sub;
            }
            if dep.subs_tail == Some(edge_id) {
                dep.subs_tail = edge.prev_sub;
            }
            if dep.active_edge == Some(edge_id) {
                dep.active_edge = None;
            }
            dep.sub_count = dep.sub_count.saturating_sub(1);
        }
    }

    /// Remove a dependency record, unlinking every subscriber edge first.
    pub(crate) fn remove_dep_record(&mut self, dep_id: DepId) {
        while let Some(edge_id) = self.deps.get(&dep_id).and_then(|d| d.subs_tail) {
            self.unlink_edge(edge_id);
        }
        self.deps.remove(&dep_id);
    }

    /// Remove a subscriber record, unlinking every outgoing edge first.
    pub(crate) fn remove_subscriber(&mut self, sub_id: SubscriberId) {
        while let Some(edge_id) = self.subs.get(&sub_id).and_then(|s| s.deps_tail) {
            self.unlink_edge(edge_id);
        }
        self.subs.remove(&sub_id);
    }
}
