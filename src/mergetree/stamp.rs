//! Sequence stamps and the concurrent-insert comparator
//!
//! Every segment carries an insertion stamp and, once removed, a removal
//! stamp. Stamps combine the global sequence number assigned by the
//! sequencer with the originating client and, while still pending, the local
//! sequence number the client assigned when it made the edit.
//!
//! # Ordering
//!
//! Stamps are totally ordered by:
//! 1. Normalised sequence number: any sequenced stamp orders before any
//!    pending stamp (pending edits will be sequenced after everything this
//!    replica has already seen)
//! 2. Client index (deterministic tiebreaker)
//! 3. Local sequence number (orders a client's own pending edits)
//!
//! The insert walk uses this order to place a new segment among segments it
//! cannot see at its insertion point: the new segment goes before every such
//! segment whose stamp orders earlier, so later-sequenced concurrent inserts
//! land to the left of earlier ones.

use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Global sequence number assigned by the sequencer
pub type SeqNum = u64;

/// Per-client counter for not-yet-acknowledged local edits
pub type LocalSeq = u32;

/// Sequence number of segments present before any op (loaded or initial content)
pub const UNIVERSAL_SEQ: SeqNum = 0;

/// Sentinel sequence number of a local edit that has not been sequenced yet
pub const UNASSIGNED_SEQ: SeqNum = SeqNum::MAX;

/// Compact per-replica index of a client id
///
/// Client ids arrive as strings on the wire; segments store this index
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientIdx(pub u32);

impl std::fmt::Display for ClientIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mapping between wire client ids and compact indices
///
/// Indices are assigned in first-seen order and are local to one replica, so
/// they never cross the wire.
#[derive(Debug, Clone, Default)]
pub struct ClientTable {
    by_name: HashMap<String, ClientIdx>,
    names: Vec<String>,
}

impl ClientTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or assign the index for a client id
    pub fn get_or_insert(&mut self, client: &str) -> Result<ClientIdx> {
        if let Some(&idx) = self.by_name.get(client) {
            return Ok(idx);
        }
        let idx = u32::try_from(self.names.len())
            .map(ClientIdx)
            .map_err(|_| MergeError::TooManyClients(self.names.len()))?;
        self.names.push(client.to_string());
        self.by_name.insert(client.to_string(), idx);
        Ok(idx)
    }

    /// Look up an existing client index
    pub fn get(&self, client: &str) -> Option<ClientIdx> {
        self.by_name.get(client).copied()
    }

    /// Wire id for an index
    pub fn name(&self, idx: ClientIdx) -> &str {
        &self.names[idx.0 as usize]
    }

    /// Number of known clients
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if no clients are known
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate wire ids in index order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Insertion stamp of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsertStamp {
    /// Sequence number, or `UNASSIGNED_SEQ` while pending
    pub seq: SeqNum,

    /// Client that inserted the segment
    pub client: ClientIdx,

    /// Local sequence number while pending
    pub local_seq: Option<LocalSeq>,
}

impl InsertStamp {
    /// Stamp for a sequenced insert
    pub fn sequenced(seq: SeqNum, client: ClientIdx) -> Self {
        Self {
            seq,
            client,
            local_seq: None,
        }
    }

    /// Stamp for a pending local insert
    pub fn pending(client: ClientIdx, local_seq: LocalSeq) -> Self {
        Self {
            seq: UNASSIGNED_SEQ,
            client,
            local_seq: Some(local_seq),
        }
    }

    /// Whether this stamp is still waiting for its sequence number
    pub fn is_pending(&self) -> bool {
        self.seq == UNASSIGNED_SEQ
    }
}

/// Removal stamp of a tombstoned segment
///
/// Concurrent removes of the same segment overlap: the earliest sequenced
/// remover owns `seq` and sits first in `clients`, later removers are
/// appended so each of them still sees the segment as removed from its own
/// perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveStamp {
    /// Sequence number of the winning removal, or `UNASSIGNED_SEQ` while
    /// only a pending local removal exists
    pub seq: SeqNum,

    /// Local sequence number of this replica's pending removal, if any
    pub local_seq: Option<LocalSeq>,

    /// Every client that removed the segment, winner first
    pub clients: SmallVec<[ClientIdx; 2]>,
}

impl RemoveStamp {
    /// Stamp for a sequenced removal
    pub fn sequenced(seq: SeqNum, client: ClientIdx) -> Self {
        let mut clients = SmallVec::new();
        clients.push(client);
        Self {
            seq,
            local_seq: None,
            clients,
        }
    }

    /// Stamp for a pending local removal
    pub fn pending(client: ClientIdx, local_seq: LocalSeq) -> Self {
        let mut clients = SmallVec::new();
        clients.push(client);
        Self {
            seq: UNASSIGNED_SEQ,
            local_seq: Some(local_seq),
            clients,
        }
    }

    /// Whether the removal is still waiting for its sequence number
    pub fn is_pending(&self) -> bool {
        self.seq == UNASSIGNED_SEQ
    }

    /// Record a sequenced removal on top of this one
    ///
    /// A sequenced remover takes over an unsequenced (pending local) stamp;
    /// otherwise the earlier sequenced removal keeps ownership.
    pub fn overlap(&mut self, seq: SeqNum, client: ClientIdx) {
        if self.is_pending() {
            self.seq = seq;
            self.clients.insert(0, client);
        } else if !self.clients.contains(&client) {
            self.clients.push(client);
        }
    }

    /// Whether a client took part in removing the segment
    pub fn removed_by(&self, client: ClientIdx) -> bool {
        self.clients.contains(&client)
    }
}

/// Who is making an edit, and under which stamp it enters the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStamp {
    /// Optimistic local edit awaiting its sequence number
    Local {
        client: ClientIdx,
        local_seq: LocalSeq,
    },

    /// Sequenced edit
    Remote { seq: SeqNum, client: ClientIdx },
}

impl OpStamp {
    /// Stamp for a segment created by this edit
    pub fn insert_stamp(&self) -> InsertStamp {
        match *self {
            Self::Local { client, local_seq } => InsertStamp::pending(client, local_seq),
            Self::Remote { seq, client } => InsertStamp::sequenced(seq, client),
        }
    }

    /// Stamp for a segment removed by this edit
    pub fn remove_stamp(&self) -> RemoveStamp {
        match *self {
            Self::Local { client, local_seq } => RemoveStamp::pending(client, local_seq),
            Self::Remote { seq, client } => RemoveStamp::sequenced(seq, client),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// Total order over insertion stamps
///
/// Pending stamps compare by local seq among themselves and after every
/// sequenced stamp. Two distinct clients never share a sequence number, so
/// the client index step never decides between segments of different
/// clients and per-replica index assignment cannot affect convergence.
pub fn compare_concurrent(a: &InsertStamp, b: &InsertStamp) -> Ordering {
    match a.seq.cmp(&b.seq) {
        Ordering::Equal => match a.client.cmp(&b.client) {
            Ordering::Equal => a
                .local_seq
                .unwrap_or(0)
                .cmp(&b.local_seq.unwrap_or(0)),
            other => other,
        },
        other => other,
    }
}

/// Whether a new insert should be placed before an existing segment it
/// cannot see at its insertion point
pub fn inserts_before(new: &InsertStamp, existing: &InsertStamp) -> bool {
    compare_concurrent(new, existing) == Ordering::Greater
}
