//! Op records exchanged with the transport
//!
//! Outbound ops carry only the sender's reference sequence number; the
//! sequencer stamps them with a sequence number, the sender's client id and
//! the current minimum sequence number, and delivers them to every replica
//! (the sender included) in one total order.
//!
//! Positions inside an op are always relative to the sender's perspective:
//! everything sequenced up to `reference_sequence_number` plus the sender's
//! own earlier edits.

use super::properties::PropertySet;
use super::segment::SegmentSpec;
use super::stamp::SeqNum;
use crate::ClientID;
use serde::{Deserialize, Serialize};

/// A sequence edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MergeTreeOp {
    /// Insert `seg` at `pos`
    Insert { pos: usize, seg: SegmentSpec },

    /// Remove `[start, end)`
    Remove { start: usize, end: usize },

    /// Merge `props` into every segment of `[start, end)`
    Annotate {
        start: usize,
        end: usize,
        props: PropertySet,
    },

    /// Sub-ops applied in order under one sequence number
    ///
    /// Each sub-op's positions already account for the effects of the
    /// sub-ops before it.
    Group { ops: Vec<MergeTreeOp> },
}

impl MergeTreeOp {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            MergeTreeOp::Insert { .. } => "insert",
            MergeTreeOp::Remove { .. } => "remove",
            MergeTreeOp::Annotate { .. } => "annotate",
            MergeTreeOp::Group { .. } => "group",
        }
    }
}

/// Op submitted to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundOp {
    /// Last sequence number the sender had applied
    pub reference_sequence_number: SeqNum,

    pub contents: MergeTreeOp,
}

impl OutboundOp {
    /// Stamp the op the way a sequencer would
    pub fn sequence(
        self,
        sequence_number: SeqNum,
        client_id: impl Into<ClientID>,
        minimum_sequence_number: SeqNum,
    ) -> SequencedOp {
        SequencedOp {
            sequence_number,
            reference_sequence_number: self.reference_sequence_number,
            client_id: client_id.into(),
            minimum_sequence_number,
            contents: self.contents,
        }
    }
}

/// Op delivered by the transport in total order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedOp {
    pub sequence_number: SeqNum,

    pub reference_sequence_number: SeqNum,

    pub client_id: ClientID,

    /// Lowest reference sequence number of any connected client
    pub minimum_sequence_number: SeqNum,

    pub contents: MergeTreeOp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let op = OutboundOp {
            reference_sequence_number: 4,
            contents: MergeTreeOp::Remove { start: 1, end: 3 },
        };
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["referenceSequenceNumber"], 4);
        assert_eq!(json["contents"]["type"], "remove");
        assert_eq!(json["contents"]["end"], 3);
    }

    #[test]
    fn test_sequence_stamps_op() {
        let op = OutboundOp {
            reference_sequence_number: 2,
            contents: MergeTreeOp::Insert {
                pos: 0,
                seg: SegmentSpec::text("hi"),
            },
        };
        let sequenced = op.sequence(5, "alice", 1);

        assert_eq!(sequenced.sequence_number, 5);
        assert_eq!(sequenced.reference_sequence_number, 2);
        assert_eq!(sequenced.client_id, "alice");
        assert_eq!(sequenced.contents.kind(), "insert");

        let json = serde_json::to_string(&sequenced).unwrap();
        let back: SequencedOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sequenced);
    }
}
