//! MergeClient: one replica of a shared sequence
//!
//! The client ties the segment tree to the op stream:
//! - Local edits apply optimistically, get recorded in the pending log and
//!   queue an [`OutboundOp`] stamped with the current sequence number
//! - Sequenced ops from other clients apply under the sender's perspective
//! - The echo of a local op acknowledges the oldest pending edit
//! - Every op advances the collaboration window; when its min seq moves the
//!   tree is compacted
//!
//! A replica that receives an op contradicting the delivery contract (a
//! reference to a sequence number it has not seen, a position outside the
//! sender's view, an echo with nothing pending) stops applying ops and must
//! be reloaded from a snapshot.
//!
//! # Example
//!
//! ```rust
//! use mergetree_core::{MergeClient, MergeTreeOptions};
//!
//! let mut alice = MergeClient::new("alice", MergeTreeOptions::default()).unwrap();
//! let mut bob = MergeClient::new("bob", MergeTreeOptions::default()).unwrap();
//!
//! alice.insert_text(0, "world").unwrap();
//! let op = alice.take_outbound().remove(0).sequence(1, "alice", 0);
//!
//! alice.apply_remote(&op).unwrap();
//! bob.apply_remote(&op).unwrap();
//! assert_eq!(alice.text(), bob.text());
//! ```

use super::ops::{MergeTreeOp, OutboundOp, SequencedOp};
use super::pending::{EditKind, EditState, PendingEdit};
use super::perspective::Perspective;
use super::properties::{PropertyMerge, PropertySet};
use super::segment::{SegmentRef, SegmentSpec};
use super::stamp::{ClientTable, LocalSeq, OpStamp, SeqNum};
use super::tree::MergeTree;
use super::window::CollaborationWindow;
use super::zamboni::CompactionStats;
use crate::error::{MergeError, Result};
use crate::options::MergeTreeOptions;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, error, trace, warn};

/// Replica lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    /// Ready for local edits and inbound ops
    Stable,

    /// Inside `apply_remote`
    Applying,

    /// An inbound op violated the protocol; reload from a snapshot
    Corrupted,
}

/// Outcome of applying a sequenced op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Another client's edit was merged
    Remote,

    /// Our own edit came back and was acknowledged
    Acked { local_seq: LocalSeq },

    /// Already applied; ignored
    Duplicate,
}

/// One replica of a merge tree sequence
#[derive(Debug)]
pub struct MergeClient {
    pub(super) id: String,
    pub(super) clients: ClientTable,
    pub(super) window: CollaborationWindow,
    pub(super) tree: MergeTree,
    outbound: VecDeque<OutboundOp>,

    /// Ops held back by an open transaction
    transaction: Option<Vec<OutboundOp>>,

    state: ReplicaState,
}

impl MergeClient {
    /// Create an empty replica for `client_id`
    pub fn new(client_id: impl Into<String>, options: MergeTreeOptions) -> Result<Self> {
        let tree = MergeTree::new(options)?;
        Self::from_parts(client_id.into(), ClientTable::new(), tree, None)
    }

    pub(super) fn from_parts(
        id: String,
        mut clients: ClientTable,
        tree: MergeTree,
        resume: Option<(SeqNum, SeqNum)>,
    ) -> Result<Self> {
        let local = clients.get_or_insert(&id)?;
        let mut window = CollaborationWindow::new(local);
        if let Some((min_seq, current_seq)) = resume {
            window.min_seq = min_seq;
            window.current_seq = current_seq;
        }
        Ok(Self {
            id,
            clients,
            window,
            tree,
            outbound: VecDeque::new(),
            transaction: None,
            state: ReplicaState::Stable,
        })
    }

    /// Replace the per-key annotate merge rule
    pub fn with_merger(mut self, merger: Box<dyn PropertyMerge>) -> Self {
        self.tree = self.tree.with_merger(merger);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ReplicaState {
        self.state
    }

    pub fn window(&self) -> &CollaborationWindow {
        &self.window
    }

    pub fn tree(&self) -> &MergeTree {
        &self.tree
    }

    /// Client ids this replica has seen, in index order
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    // ---- local view ----------------------------------------------------

    /// Visible length including pending edits
    pub fn length(&self) -> usize {
        self.tree.length_at(&Perspective::Local)
    }

    /// Visible text including pending edits
    pub fn text(&self) -> String {
        self.tree.text(&Perspective::Local)
    }

    /// Visible items including pending edits
    pub fn items(&self) -> Vec<Value> {
        self.tree.items(&Perspective::Local)
    }

    /// Properties of the element at `pos`
    pub fn properties_at(&self, pos: usize) -> Option<&PropertySet> {
        self.tree.properties_at(pos, &Perspective::Local)
    }

    /// Whether local edits are still waiting for acknowledgement
    pub fn has_pending(&self) -> bool {
        !self.tree.pending.is_empty()
    }

    // ---- local edits ---------------------------------------------------

    /// Insert content at a local position
    ///
    /// # Arguments
    ///
    /// * `pos` - Position in the local view (0 to `length()`)
    /// * `spec` - Content and initial properties
    ///
    /// # Returns
    ///
    /// Handle of the new segment. The edit is queued for submission.
    pub fn insert(&mut self, pos: usize, spec: SegmentSpec) -> Result<SegmentRef> {
        self.ensure_usable()?;
        let (local_seq, stamp) = self.next_stamp();
        let segment = self
            .tree
            .insert(pos, spec.clone(), &Perspective::Local, stamp)?;
        self.record(
            local_seq,
            EditKind::Insert,
            vec![segment],
            MergeTreeOp::Insert { pos, seg: spec },
        );
        Ok(segment)
    }

    /// Insert text at a local position
    pub fn insert_text(&mut self, pos: usize, text: &str) -> Result<SegmentRef> {
        self.insert(pos, SegmentSpec::text(text))
    }

    /// Remove `[start, end)` of the local view
    pub fn remove(&mut self, start: usize, end: usize) -> Result<()> {
        self.ensure_usable()?;
        let (local_seq, stamp) = self.next_stamp();
        let segments = self
            .tree
            .mark_range_removed(start, end, &Perspective::Local, stamp)?;
        if segments.is_empty() {
            return Ok(());
        }
        self.record(
            local_seq,
            EditKind::Remove,
            segments,
            MergeTreeOp::Remove { start, end },
        );
        Ok(())
    }

    /// Merge `props` into every element of `[start, end)`
    ///
    /// A `null` value deletes the key under the default merge rule.
    pub fn annotate(&mut self, start: usize, end: usize, props: PropertySet) -> Result<()> {
        self.ensure_usable()?;
        let (local_seq, stamp) = self.next_stamp();
        let (segments, priors) =
            self.tree
                .annotate_range(start, end, &props, &Perspective::Local, stamp)?;
        if segments.is_empty() {
            return Ok(());
        }
        self.record(
            local_seq,
            EditKind::Annotate {
                props: props.clone(),
                priors,
            },
            segments,
            MergeTreeOp::Annotate { start, end, props },
        );
        Ok(())
    }

    /// Drain ops ready for submission
    pub fn take_outbound(&mut self) -> Vec<OutboundOp> {
        self.outbound.drain(..).collect()
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ReplicaState::Corrupted => Err(MergeError::Corrupted),
            _ => Ok(()),
        }
    }

    /// Stamp for the next local edit; the counter only moves once it is recorded
    fn next_stamp(&self) -> (LocalSeq, OpStamp) {
        let local_seq = self.window.local_seq() + 1;
        let stamp = OpStamp::Local {
            client: self.window.client,
            local_seq,
        };
        (local_seq, stamp)
    }

    fn record(
        &mut self,
        local_seq: LocalSeq,
        kind: EditKind,
        segments: Vec<SegmentRef>,
        contents: MergeTreeOp,
    ) {
        let issued = self.window.next_local_seq();
        debug_assert_eq!(issued, local_seq);

        let state = if self.transaction.is_some() {
            EditState::InTransaction
        } else {
            EditState::AwaitingAck
        };
        trace!(local_seq, kind = kind.name(), segments = segments.len(), "local edit");
        self.tree.pending.push(PendingEdit {
            local_seq,
            kind,
            segments,
            state,
        });

        let op = OutboundOp {
            reference_sequence_number: self.window.current_seq,
            contents,
        };
        match self.transaction.as_mut() {
            Some(held) => held.push(op),
            None => self.outbound.push_back(op),
        }
    }

    // ---- inbound -------------------------------------------------------

    /// Apply an op delivered by the sequencer
    ///
    /// Ops must arrive in sequence order. An op at or below the current
    /// sequence number is ignored. Any other inconsistency is a protocol
    /// violation: the replica becomes [`ReplicaState::Corrupted`] and rejects
    /// everything after it.
    pub fn apply_remote(&mut self, op: &SequencedOp) -> Result<Applied> {
        self.ensure_usable()?;
        if op.sequence_number <= self.window.current_seq {
            warn!(
                seq = op.sequence_number,
                current_seq = self.window.current_seq,
                "ignoring duplicate op"
            );
            return Ok(Applied::Duplicate);
        }

        self.state = ReplicaState::Applying;
        match self.apply_sequenced(op) {
            Ok(applied) => {
                self.state = ReplicaState::Stable;
                Ok(applied)
            }
            Err(err) => {
                error!(seq = op.sequence_number, client = %op.client_id, %err, "replica corrupted");
                self.state = ReplicaState::Corrupted;
                Err(err)
            }
        }
    }

    fn apply_sequenced(&mut self, op: &SequencedOp) -> Result<Applied> {
        let seq = op.sequence_number;
        if op.reference_sequence_number > self.window.current_seq {
            return Err(MergeError::protocol(
                seq,
                format!(
                    "reference seq {} is ahead of current seq {}",
                    op.reference_sequence_number, self.window.current_seq
                ),
            ));
        }
        if op.reference_sequence_number < self.window.min_seq {
            return Err(MergeError::protocol(
                seq,
                format!(
                    "reference seq {} is below the window min seq {}",
                    op.reference_sequence_number, self.window.min_seq
                ),
            ));
        }

        let applied = if op.client_id == self.id {
            let edit = self
                .tree
                .pending
                .pop_front()
                .ok_or_else(|| MergeError::protocol(seq, "ack with empty pending log"))?;
            if edit.state != EditState::AwaitingAck {
                return Err(MergeError::protocol(seq, "ack for an unsubmitted edit"));
            }
            self.tree.ack_edit(&edit, seq);
            trace!(seq, local_seq = edit.local_seq, kind = edit.kind.name(), "acked local edit");
            Applied::Acked {
                local_seq: edit.local_seq,
            }
        } else {
            let client = self.clients.get_or_insert(&op.client_id)?;
            let perspective = Perspective::of_client(op.reference_sequence_number, client);
            let stamp = OpStamp::Remote { seq, client };
            self.apply_op(&op.contents, &perspective, stamp)
                .map_err(|err| MergeError::protocol(seq, err.to_string()))?;
            debug!(
                seq,
                ref_seq = op.reference_sequence_number,
                client = %op.client_id,
                kind = op.contents.kind(),
                "applied remote op"
            );
            Applied::Remote
        };

        if self.window.advance(seq, op.minimum_sequence_number)? {
            let min_seq = self.window.min_seq;
            trace!(min_seq, "window advanced");
            self.tree.set_min_seq(min_seq);
            if self.tree.options().compact_on_advance {
                self.tree.compact();
            }
        }
        Ok(applied)
    }

    fn apply_op(&mut self, op: &MergeTreeOp, perspective: &Perspective, stamp: OpStamp) -> Result<()> {
        match op {
            MergeTreeOp::Insert { pos, seg } => {
                self.tree.insert(*pos, seg.clone(), perspective, stamp)?;
            }
            MergeTreeOp::Remove { start, end } => {
                self.tree
                    .mark_range_removed(*start, *end, perspective, stamp)?;
            }
            MergeTreeOp::Annotate { start, end, props } => {
                self.tree
                    .annotate_range(*start, *end, props, perspective, stamp)?;
            }
            MergeTreeOp::Group { ops } => {
                for op in ops {
                    self.apply_op(op, perspective, stamp)?;
                }
            }
        }
        Ok(())
    }

    /// Compact against the current min seq without waiting for it to move
    pub fn compact(&mut self) -> CompactionStats {
        self.tree.compact()
    }

    // ---- position translation ------------------------------------------

    /// Position in the acknowledged state for a local position
    ///
    /// Pending local edits are stripped: a position inside pending inserted
    /// content maps to where that content will be inserted.
    pub fn local_to_sequenced(&self, pos: usize) -> Result<usize> {
        self.tree.translate(
            pos,
            &Perspective::Local,
            &Perspective::at(self.window.current_seq),
        )
    }

    /// Local position for a position in `client_id`'s view at `ref_seq`
    pub fn sequenced_to_local(&self, pos: usize, ref_seq: SeqNum, client_id: &str) -> Result<usize> {
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| MergeError::UnknownClient(client_id.to_string()))?;
        self.tree.translate(
            pos,
            &Perspective::of_client(ref_seq, client),
            &Perspective::Local,
        )
    }

    // ---- transactions --------------------------------------------------

    /// Hold back outbound ops until commit
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.transaction.is_some() {
            return Err(MergeError::TransactionOpen);
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    /// Release the transaction's ops for submission; returns how many
    pub fn commit_transaction(&mut self) -> Result<usize> {
        let held = self.transaction.take().ok_or(MergeError::NoTransaction)?;
        self.tree.pending.submit_transaction();
        let count = held.len();
        self.outbound.extend(held);
        debug!(count, "committed transaction");
        Ok(count)
    }

    /// Undo every edit of the open transaction, newest first
    ///
    /// Nothing was submitted, so no compensating ops are sent.
    pub fn rollback_transaction(&mut self) -> Result<usize> {
        self.transaction.take().ok_or(MergeError::NoTransaction)?;
        let local = self.window.client;
        let mut count = 0;
        while let Some(edit) = self.tree.pending.pop_in_transaction() {
            self.tree.rollback_edit(&edit, local);
            count += 1;
        }
        debug!(count, "rolled back transaction");
        Ok(count)
    }

    // ---- resubmission --------------------------------------------------

    /// Rebuild every pending edit as an op against the current state
    ///
    /// Used after reconnecting: ops submitted earlier may reference
    /// positions the sequencer can no longer resolve. Each pending edit
    /// yields exactly one op (a `Group` when its segments are no longer
    /// contiguous), so acknowledgements keep matching the pending log.
    /// Pending inserts first move to the slot the rebuilt op gives them on
    /// other replicas. Anything still queued is replaced.
    pub fn regenerate_pending_ops(&mut self) -> Result<Vec<OutboundOp>> {
        self.ensure_usable()?;
        if self.transaction.is_some() {
            return Err(MergeError::TransactionOpen);
        }
        let ref_seq = self.window.current_seq;
        let local_seqs: Vec<LocalSeq> = self.tree.pending.iter().map(|edit| edit.local_seq).collect();
        let mut ops = Vec::with_capacity(local_seqs.len());
        for local_seq in local_seqs {
            let Some(edit) = self.tree.pending.get(local_seq).cloned() else {
                continue;
            };
            if let EditKind::Insert = edit.kind {
                self.tree.resettle_insert(&edit);
            }
            ops.push(OutboundOp {
                reference_sequence_number: ref_seq,
                contents: rebuild_op(&self.tree, &edit),
            });
        }
        self.outbound.clear();
        debug!(count = ops.len(), ref_seq, "regenerated pending ops");
        Ok(ops)
    }
}

/// Express a pending edit against the current state
///
/// Positions come from the local view with this and every later pending
/// edit stripped. Pieces go out in document order; each sub-op's position
/// accounts for the pieces before it.
fn rebuild_op(tree: &MergeTree, edit: &PendingEdit) -> MergeTreeOp {
    let view = Perspective::LocalBefore(edit.local_seq);
    let mut pieces: Vec<(Vec<usize>, SegmentRef)> = edit
        .segments
        .iter()
        .filter(|&&piece| tree.segment(piece).is_ok())
        .map(|&piece| (tree.document_order(piece), piece))
        .collect();
    pieces.sort();

    let mut ops = Vec::with_capacity(pieces.len());
    let mut shift = 0;
    for (_, piece) in pieces {
        let Ok(segment) = tree.segment(piece) else {
            continue;
        };
        let Ok(pos) = tree.position_of(piece, &view) else {
            continue;
        };
        match &edit.kind {
            EditKind::Insert => {
                ops.push(MergeTreeOp::Insert {
                    pos: pos + shift,
                    seg: SegmentSpec {
                        payload: segment.payload().clone(),
                        props: segment.properties.sequenced_values(),
                    },
                });
                shift += segment.len();
            }
            EditKind::Remove => {
                let ours = segment
                    .removal()
                    .is_some_and(|r| r.is_pending() && r.local_seq == Some(edit.local_seq));
                if !ours {
                    continue;
                }
                let start = pos - shift;
                ops.push(MergeTreeOp::Remove {
                    start,
                    end: start + segment.len(),
                });
                shift += segment.len();
            }
            EditKind::Annotate { props, .. } => {
                if segment.visible_len(&view) == 0 {
                    continue;
                }
                ops.push(MergeTreeOp::Annotate {
                    start: pos,
                    end: pos + segment.len(),
                    props: props.clone(),
                });
            }
        }
    }

    if ops.len() == 1 {
        ops.remove(0)
    } else {
        MergeTreeOp::Group { ops }
    }
}
