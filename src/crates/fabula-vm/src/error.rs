//! Error types for frame execution, planning, and replay
//!
//! # Error Policy
//!
//! Hard failures abort the step: the frame propagates the error, no patch
//! is committed, and no journal entry is written. Soft planning failures
//! (waived requirements, offers that could not be accepted) are *recorded*
//! in build receipts and never surface here.

use thiserror::Error;
use uuid::Uuid;

use fabula_core::error::{CoreError, HandlerError};

/// Convenience result type using [`VmError`]
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors raised by the resolution frame, the ledger, and replay.
#[derive(Error, Debug)]
pub enum VmError {
    /// The VALIDATE phase rejected the proposed cursor, or the followed
    /// item was not a traversable edge.
    ///
    /// The step is not committed.
    #[error("invalid cursor: {reason}")]
    InvalidCursor {
        /// Why the cursor was rejected
        reason: String,
    },

    /// `follow_edge` was asked to traverse an edge with a missing endpoint.
    #[error("edge {edge} has an unresolved endpoint")]
    DanglingEdge {
        /// The offending edge
        edge: Uuid,
    },

    /// The call stack is full; following another call edge would exceed the
    /// depth limit.
    #[error("call stack overflow at depth {depth}")]
    StackOverflow {
        /// Depth at the time of the rejected push
        depth: usize,
    },

    /// A patch was applied against a graph whose state-hash does not match
    /// the patch's recorded baseline.
    #[error("state hash mismatch: patch expects {expected}, graph is {actual}")]
    StateHashMismatch {
        /// Baseline hash recorded on the patch
        expected: String,
        /// Hash of the graph the patch was applied to
        actual: String,
    },

    /// Stream recovery found no snapshot record to start from.
    #[error("no snapshot found in record stream")]
    MissingSnapshot,

    /// An event could not be applied during replay.
    #[error("event replay failed: {reason}")]
    ReplayFailed {
        /// What went wrong
        reason: String,
    },

    /// A dispatched handler raised; the step is not committed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A graph/registry operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VmError {
    /// Create an [`VmError::InvalidCursor`] with a formatted reason
    pub fn invalid_cursor(reason: impl Into<String>) -> Self {
        Self::InvalidCursor {
            reason: reason.into(),
        }
    }

    /// Create a [`VmError::ReplayFailed`] with a formatted reason
    pub fn replay_failed(reason: impl Into<String>) -> Self {
        Self::ReplayFailed {
            reason: reason.into(),
        }
    }
}
