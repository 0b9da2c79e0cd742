//! Error types for graph construction, registry operations, and dispatch
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//!
//! # Error Categories
//!
//! - **Identity**: [`CoreError::DuplicateIdentity`], [`CoreError::AmbiguousLabel`]
//! - **Graph structure**: [`CoreError::CycleDetected`], [`CoreError::DanglingEdge`]
//! - **Lookup**: [`CoreError::NotFound`]
//! - **Streams**: [`CoreError::MarkerExists`], [`CoreError::MarkerMissing`]
//! - **Encoding**: [`CoreError::Structure`], [`CoreError::Serialization`]
//! - **Dispatch**: [`CoreError::Handler`]

use thiserror::Error;
use uuid::Uuid;

/// Convenience result type using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// A failure raised from inside a handler function.
///
/// Handlers are opaque callables; anything they report is carried as a
/// message plus the label of the behavior that raised it, so dispatch can
/// surface which registration failed.
#[derive(Error, Debug, Clone)]
#[error("handler '{behavior}' failed: {message}")]
pub struct HandlerError {
    /// Label (or short uid) of the behavior that failed
    pub behavior: String,
    /// Human-readable failure description
    pub message: String,
}

impl HandlerError {
    pub fn new(behavior: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            behavior: behavior.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the entity, graph, registry, and record-stream layers
#[derive(Error, Debug)]
pub enum CoreError {
    /// An item with this uid is already registered and is not the same item.
    #[error("uid {uid} is already bound to a different item")]
    DuplicateIdentity {
        /// The contested uid
        uid: Uuid,
    },

    /// A label getter matched more than one item.
    ///
    /// Label uniqueness is not globally enforced; use `find_one` when a
    /// best-effort lookup is acceptable.
    #[error("label '{label}' is ambiguous ({count} matches)")]
    AmbiguousLabel {
        /// The contested label
        label: String,
        /// Number of items carrying the label
        count: usize,
    },

    /// A uid or label did not resolve.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing item
        what: String,
    },

    /// A subgraph membership change would make the containment tree cyclic.
    #[error("containment cycle detected at {uid}")]
    CycleDetected {
        /// The node whose insertion would close the cycle
        uid: Uuid,
    },

    /// An edge endpoint does not resolve in the graph.
    ///
    /// Edges with unresolved endpoints are permitted during construction;
    /// this is raised only when such an edge is actually traversed.
    #[error("edge {edge} has an unresolved endpoint")]
    DanglingEdge {
        /// The offending edge
        edge: Uuid,
    },

    /// An attribute name is not settable on the target item.
    #[error("unknown attribute '{name}'")]
    UnknownAttribute {
        /// The attribute name
        name: String,
    },

    /// A stream marker with this name already exists.
    #[error("marker '{name}' already set")]
    MarkerExists {
        /// The duplicate marker name
        name: String,
    },

    /// A stream marker lookup failed.
    #[error("marker '{name}' not found")]
    MarkerMissing {
        /// The missing marker name
        name: String,
    },

    /// Structuring a serialized tree back into typed items failed.
    #[error("structure error: {0}")]
    Structure(String),

    /// JSON encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A dispatched handler reported a failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl CoreError {
    /// Create a [`CoreError::NotFound`] with a formatted description
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a [`CoreError::Structure`] with a formatted description
    pub fn structure(msg: impl Into<String>) -> Self {
        Self::Structure(msg.into())
    }
}
