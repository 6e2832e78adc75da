//! MergeTree Core - Sequence CRDT engine
//!
//! This is the Rust core of a collaborative sequence: many clients edit one
//! ordered collection (text, items, markers) concurrently and converge
//! without locking, given a sequencer that totally orders their ops.
//! It implements:
//! - Segment tree with per-block partial lengths
//! - Concurrent-insert ordering over sequence stamps
//! - Collaboration window with tombstone compaction
//! - Position translation between local and sequenced views
//! - Op pipeline with acknowledgement, transactions and resubmission
//!
//! # Examples
//!
//! ```rust
//! use mergetree_core::{ClientID, MergeClient, MergeTreeOptions};
//!
//! let client_id: ClientID = "client-1".to_string();
//! let mut doc = MergeClient::new(client_id, MergeTreeOptions::default()).unwrap();
//! doc.insert_text(0, "Hello World").unwrap();
//! doc.remove(5, 11).unwrap();
//! assert_eq!(doc.text(), "Hello");
//! ```

pub mod error;
pub mod mergetree;
pub mod options;

// Re-exports for convenience
pub use error::{MergeError, Result};
pub use mergetree::{
    Applied, MergeClient, MergeTree, MergeTreeOp, OutboundOp, Perspective, ReplicaState,
    SegmentRef, SegmentSpec, SequencedOp, Snapshot,
};
pub use options::MergeTreeOptions;

/// Client identifier type
pub type ClientID = String;
