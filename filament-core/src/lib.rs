//! Filament Core
//!
//! This crate implements a fine-grained reactive dependency-tracking engine:
//! mutable cells and derived (computed) values that automatically discover
//! which cells they read, cache their result, and invalidate only when a
//! relevant upstream cell changes.
//!
//! # Architecture
//!
//! Everything lives in the `reactive` module:
//!
//! - `Cell`: mutable reactive storage
//! - `Computed`: lazily recomputed, cached derived values
//! - `Observer`: the integration seam for render bridges and other external
//!   consumers
//! - `Runtime`: one reactive graph instance, holding the edge tables and the
//!   evaluation context
//!
//! Execution is single-threaded, fully synchronous, and pull-based: writes
//! propagate dirtiness eagerly, but recomputation happens inline during the
//! read that discovers it.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::reactive::Runtime;
//!
//! let rt = Runtime::new();
//! let count = rt.cell(1);
//!
//! let count_clone = count.clone();
//! let doubled = rt.computed(move || count_clone.get() * 2);
//!
//! assert_eq!(doubled.get(), 2);
//! count.set(5);
//! assert_eq!(doubled.get(), 10); // recomputed on read
//! ```

pub mod reactive;
