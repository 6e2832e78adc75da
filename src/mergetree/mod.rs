//! Merge tree: a sequence CRDT over a shared total order of ops
//!
//! Many clients concurrently insert, remove and annotate ranges of one
//! ordered sequence. A sequencer assigns every op a global sequence number;
//! each client applies its own edits optimistically and merges everyone
//! else's as they arrive, and all replicas converge.
//!
//! # Architecture
//!
//! - **Segments**: runs of content with insertion and removal stamps.
//!   Removal leaves a zero-width tombstone; content is never edited in place
//! - **Segment tree**: a B-tree over segments whose blocks cache partial
//!   lengths, so a position can be resolved as any client saw it at any
//!   sequence number inside the collaboration window
//! - **Perspectives**: named viewpoints (local, remote as of a ref seq,
//!   local minus later pending edits) for interpreting positions
//! - **Comparator**: a total order on insertion stamps that settles where
//!   concurrent inserts at the same position land
//! - **Zamboni**: compaction that evicts tombstones and coalesces segments
//!   once the window's min seq has passed them
//!
//! # Example
//!
//! ```rust
//! use mergetree_core::{MergeClient, MergeTreeOptions};
//!
//! let mut alice = MergeClient::new("alice", MergeTreeOptions::default()).unwrap();
//! let mut bob = MergeClient::new("bob", MergeTreeOptions::default()).unwrap();
//!
//! // Concurrent inserts at the same position
//! alice.insert_text(0, "hello").unwrap();
//! bob.insert_text(0, "world ").unwrap();
//!
//! let first = alice.take_outbound().remove(0).sequence(1, "alice", 0);
//! let second = bob.take_outbound().remove(0).sequence(2, "bob", 0);
//! for op in [&first, &second] {
//!     alice.apply_remote(op).unwrap();
//!     bob.apply_remote(op).unwrap();
//! }
//!
//! // Both replicas converge; the later-sequenced insert lands first
//! assert_eq!(alice.text(), bob.text());
//! assert_eq!(alice.text(), "world hello");
//! ```

mod arena;
mod client;
mod ops;
mod partial_lengths;
mod pending;
mod perspective;
mod properties;
mod segment;
mod snapshot;
mod stamp;
mod tree;
mod window;
mod zamboni;

pub use client::{Applied, MergeClient, ReplicaState};
pub use ops::{MergeTreeOp, OutboundOp, SequencedOp};
pub use pending::{EditKind, EditState, PendingEdit, PendingLog};
pub use perspective::Perspective;
pub use properties::{LastWriterWins, PriorValues, Properties, PropertyMerge, PropertySet};
pub use segment::{Payload, Segment, SegmentRef, SegmentSpec};
pub use snapshot::{Snapshot, SnapshotSegment};
pub use stamp::{
    compare_concurrent, inserts_before, ClientIdx, ClientTable, InsertStamp, LocalSeq, OpStamp,
    RemoveStamp, SeqNum, UNASSIGNED_SEQ, UNIVERSAL_SEQ,
};
pub use tree::MergeTree;
pub use window::CollaborationWindow;
pub use zamboni::CompactionStats;
