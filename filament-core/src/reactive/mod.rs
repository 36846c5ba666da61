//! Reactive primitives.
//!
//! This module implements the core reactive system: cells, computed values,
//! and the dependency graph connecting them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state. When a cell's value is read
//! while a subscriber is evaluating, the cell automatically registers that
//! subscriber as a dependent. When the cell's value changes, all dependents
//! are notified.
//!
//! ## Computed values
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of the dependencies it actually read changes, and only when
//! someone reads it again: notification is push, recomputation is pull.
//!
//! ## Observers
//!
//! An [`Observer`] is the bridge to the world outside the graph. It supplies
//! a callback that fires when any dependency read during its last
//! [`Observer::run`] changes; what to do then (rerender, re-run, coalesce)
//! is the consumer's business.
//!
//! # Implementation notes
//!
//! Dependencies are discovered automatically: the [`Runtime`] holds a single
//! active-subscriber slot, and every read while the slot is occupied links an
//! edge from the reader to the value. Each edge is threaded through two
//! doubly-linked lists at once (the subscriber's read list and the
//! dependency's subscriber list), a shape used by Vue 3's reactivity core and
//! Preact signals. Edges are revalidated per evaluation pass, so dependency
//! sets shrink when a branch stops being read.

mod cell;
mod computed;
mod dep;
mod error;
mod runtime;
mod side_table;
mod subscriber;

pub use cell::Cell;
pub use computed::Computed;
pub use dep::DepId;
pub use error::WriteError;
pub use runtime::Runtime;
pub use side_table::{Owner, OwnerId, TrackOp, TriggerOp};
pub use subscriber::{Observer, SubscriberId};
