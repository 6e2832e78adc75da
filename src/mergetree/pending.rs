//! Pending edit log
//!
//! Every local edit leaves a record here until its acknowledgement arrives.
//! Records are FIFO: the sequencer delivers a client's ops in submission
//! order, so an ack always resolves the oldest record. Records opened inside
//! a transaction sit at the back of the log and double as the compensating
//! edit stack for rollback.

use super::properties::{PriorValues, PropertySet};
use super::segment::SegmentRef;
use super::stamp::LocalSeq;
use std::collections::{HashMap, VecDeque};

/// What a pending edit did to its segments
#[derive(Debug, Clone, PartialEq)]
pub enum EditKind {
    Insert,
    Remove,
    Annotate {
        props: PropertySet,

        /// Values each segment held before the annotate
        priors: HashMap<SegmentRef, PriorValues>,
    },
}

impl EditKind {
    pub fn name(&self) -> &'static str {
        match self {
            EditKind::Insert => "insert",
            EditKind::Remove => "remove",
            EditKind::Annotate { .. } => "annotate",
        }
    }
}

/// Lifecycle of a local edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// Applied locally inside an open transaction; not yet submitted
    InTransaction,

    /// Submitted; waiting for the sequencer's echo
    AwaitingAck,
}

/// A local edit that has not been acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub local_seq: LocalSeq,
    pub kind: EditKind,

    /// Segments the edit touched; split tails are appended as they appear
    pub segments: Vec<SegmentRef>,

    pub state: EditState,
}

/// FIFO of pending local edits, ordered by local seq
#[derive(Debug, Clone, Default)]
pub struct PendingLog {
    edits: VecDeque<PendingEdit>,
}

impl PendingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn push(&mut self, edit: PendingEdit) {
        debug_assert!(self
            .edits
            .back()
            .map_or(true, |last| last.local_seq < edit.local_seq));
        self.edits.push_back(edit);
    }

    /// Oldest edit, the next one to be acknowledged
    pub fn front(&self) -> Option<&PendingEdit> {
        self.edits.front()
    }

    pub fn pop_front(&mut self) -> Option<PendingEdit> {
        self.edits.pop_front()
    }

    /// Newest edit if it belongs to an open transaction
    pub fn pop_in_transaction(&mut self) -> Option<PendingEdit> {
        match self.edits.back() {
            Some(edit) if edit.state == EditState::InTransaction => self.edits.pop_back(),
            _ => None,
        }
    }

    pub fn get(&self, local_seq: LocalSeq) -> Option<&PendingEdit> {
        let idx = self
            .edits
            .binary_search_by_key(&local_seq, |edit| edit.local_seq)
            .ok()?;
        self.edits.get(idx)
    }

    fn get_mut(&mut self, local_seq: LocalSeq) -> Option<&mut PendingEdit> {
        let idx = self
            .edits
            .binary_search_by_key(&local_seq, |edit| edit.local_seq)
            .ok()?;
        self.edits.get_mut(idx)
    }

    /// Mark every transaction record as submitted
    pub fn submit_transaction(&mut self) {
        for edit in self.edits.iter_mut().rev() {
            if edit.state != EditState::InTransaction {
                break;
            }
            edit.state = EditState::AwaitingAck;
        }
    }

    /// A segment referenced by `local_seq` was split; track the tail too
    pub(crate) fn record_split(&mut self, local_seq: LocalSeq, head: SegmentRef, tail: SegmentRef) {
        let Some(edit) = self.get_mut(local_seq) else {
            return;
        };
        edit.segments.push(tail);
        if let EditKind::Annotate { priors, .. } = &mut edit.kind {
            if let Some(prior) = priors.get(&head).cloned() {
                priors.insert(tail, prior);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEdit> {
        self.edits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergetree::arena::Arena;

    fn refs(n: usize) -> Vec<SegmentRef> {
        let mut arena = Arena::new();
        (0..n).map(|_| SegmentRef(arena.insert(()))).collect()
    }

    fn edit(local_seq: LocalSeq, state: EditState) -> PendingEdit {
        PendingEdit {
            local_seq,
            kind: EditKind::Insert,
            segments: Vec::new(),
            state,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut log = PendingLog::new();
        log.push(edit(1, EditState::AwaitingAck));
        log.push(edit(2, EditState::AwaitingAck));

        assert_eq!(log.pop_front().map(|e| e.local_seq), Some(1));
        assert_eq!(log.front().map(|e| e.local_seq), Some(2));
    }

    #[test]
    fn test_transaction_pops_only_open_records() {
        let mut log = PendingLog::new();
        log.push(edit(1, EditState::AwaitingAck));
        log.push(edit(2, EditState::InTransaction));
        log.push(edit(3, EditState::InTransaction));

        assert_eq!(log.pop_in_transaction().map(|e| e.local_seq), Some(3));
        log.submit_transaction();
        assert_eq!(log.pop_in_transaction(), None);
        assert_eq!(log.get(2).map(|e| e.state), Some(EditState::AwaitingAck));
    }

    #[test]
    fn test_record_split_copies_priors() {
        let segs = refs(2);
        let mut priors = HashMap::new();
        priors.insert(segs[0], PriorValues::new());

        let mut log = PendingLog::new();
        log.push(PendingEdit {
            local_seq: 4,
            kind: EditKind::Annotate {
                props: PropertySet::new(),
                priors,
            },
            segments: vec![segs[0]],
            state: EditState::AwaitingAck,
        });

        log.record_split(4, segs[0], segs[1]);
        log.record_split(99, segs[0], segs[1]);

        let edit = log.get(4).unwrap();
        assert_eq!(edit.segments, segs);
        match &edit.kind {
            EditKind::Annotate { priors, .. } => assert!(priors.contains_key(&segs[1])),
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
