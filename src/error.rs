//! Error types for merge tree operations
//!
//! Errors fall into three groups:
//! - **Local input errors** (`InvalidPosition`, `InvalidRange`): the caller's
//!   edit is rejected before it touches the tree.
//! - **Stale handles** (`StaleReference`): a held segment was evicted by
//!   compaction or coalesced into a neighbour; re-resolve from a position.
//! - **Protocol violations** (`ProtocolViolation`, `Corrupted`): an inbound op
//!   contradicts the causal-delivery contract. The replica fails closed and
//!   must be reloaded from a fresh snapshot.

use thiserror::Error;

/// Merge tree error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// Position is beyond the length visible under the requested perspective
    #[error("Position {position} out of bounds (length: {length})")]
    InvalidPosition { position: usize, length: usize },

    /// Range is inverted or extends past the visible length
    #[error("Range {start}..{end} out of bounds (length: {length})")]
    InvalidRange {
        start: usize,
        end: usize,
        length: usize,
    },

    /// Insert with content that occupies no positions
    #[error("Cannot insert an empty segment")]
    EmptySegment,

    /// Segment handle no longer resolves
    #[error("Stale segment reference: {0}")]
    StaleReference(String),

    /// Inbound op is inconsistent with the sequenced stream
    #[error("Protocol violation at seq {seq}: {reason}")]
    ProtocolViolation { seq: u64, reason: String },

    /// Client id has never been seen by this replica
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// No index left for another client id
    #[error("Client table is full ({0} clients)")]
    TooManyClients(usize),

    /// Replica stopped applying ops after an earlier protocol violation
    #[error("Replica is corrupted and must be reloaded from a snapshot")]
    Corrupted,

    /// Commit or rollback without an open transaction
    #[error("No transaction is open")]
    NoTransaction,

    /// Operation not allowed while a transaction is open
    #[error("A transaction is already open")]
    TransactionOpen,

    /// Invalid configuration
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Snapshot or options (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for merge tree operations
pub type Result<T> = std::result::Result<T, MergeError>;

impl MergeError {
    /// Create a protocol violation error
    pub fn protocol(seq: u64, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            seq,
            reason: reason.into(),
        }
    }

    /// Whether the error leaves the replica unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::Corrupted)
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MergeError::InvalidPosition {
            position: 10,
            length: 3,
        };
        assert_eq!(err.to_string(), "Position 10 out of bounds (length: 3)");

        let err = MergeError::protocol(7, "ack with empty pending log");
        assert_eq!(
            err.to_string(),
            "Protocol violation at seq 7: ack with empty pending log"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MergeError::Corrupted.is_fatal());
        assert!(MergeError::protocol(1, "x").is_fatal());
        assert!(!MergeError::NoTransaction.is_fatal());
        assert!(!MergeError::TooManyClients(4).is_fatal());
        assert!(!MergeError::InvalidRange {
            start: 2,
            end: 1,
            length: 5
        }
        .is_fatal());
    }
}
