//! Key-value observation substrate for hub-rs.
//!
//! This crate implements the reactive half of the object-graph layer:
//! observable objects with computed properties and dependent-key
//! invalidation, change coalescing via property-change groups, observation
//! of dotted property paths across a graph that materializes incrementally,
//! and an [`ObservationContext`] that defers path observers until their
//! roots come into being and coalesces notifications while observation is
//! suspended.
//!
//! All state is single-threaded cooperative: every operation is synchronous,
//! and the only deferral points are the suspension counter on the context
//! and the `begin_property_changes` / `end_property_changes` bracket on an
//! object.

use thiserror::Error;

mod chain;
pub mod context;
pub mod object;
pub mod observer;
mod path;
pub mod property;
pub mod value;

pub use context::ObservationContext;
pub use object::{ObservableObject, PropertyDelegate, WeakObservable};
pub use observer::{Notification, Observer, ObserverMember, ObserverSet};
pub use property::ComputedProperty;
pub use value::PropValue;

/// Errors raised synchronously for API misuse.
///
/// Observer callbacks themselves are never wrapped: a panic inside a
/// callback aborts the current fan-out pass and propagates to whoever
/// triggered the change.
#[derive(Debug, Error)]
pub enum KvoError {
    /// A property path was empty or contained an empty segment.
    #[error("malformed property path: {0:?}")]
    MalformedPath(String),
    /// An intermediate path segment did not resolve to an observable object.
    #[error("segment {segment:?} of path {path:?} did not resolve to an object")]
    PathNotResolvable { path: String, segment: String },
    /// A context-level path named a root that is not registered and has no
    /// pending registration to cancel.
    #[error("observable root {0:?} is not registered")]
    UnknownRoot(String),
}
