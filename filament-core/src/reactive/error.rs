//! Error types for the reactive system.
//!
//! The engine is synchronous and almost entirely infallible by contract:
//! getter panics propagate to the reader, and usage misconfigurations are
//! reported rather than raised. The one typed error covers writes to a
//! read-only computed, for callers that prefer handling the condition over
//! the default warn-and-discard behavior.

use thiserror::Error;

/// Failure to write through a reactive handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The computed was created without a setter.
    #[error("computed value is read-only")]
    ReadOnly,
}
