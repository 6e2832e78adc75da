//! Segment: the smallest unit of sequence content
//!
//! A segment pairs an opaque payload with its lifecycle metadata: the stamp
//! of the insert that created it, the stamp of the remove that tombstoned it
//! (if any), and its annotate properties.
//!
//! Content is never edited in place. The only length change a segment sees
//! is a structural split, which hands the tail of the content to a fresh
//! segment carrying identical metadata.

use super::arena::Key;
use super::perspective::Perspective;
use super::properties::{Properties, PropertySet};
use super::stamp::{InsertStamp, LocalSeq, RemoveStamp, SeqNum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use unicode_segmentation::UnicodeSegmentation;

/// Stable handle to a segment
///
/// Handles survive edits (a split keeps the head on the original handle) but
/// not compaction: once a tombstone is evicted or a segment is coalesced into
/// its left neighbour, the handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentRef(pub(crate) Key);

impl std::fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Segment content
///
/// A closed set of payload kinds. Text length counts grapheme clusters, so
/// positions never fall inside a user-perceived character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// Run of text
    Text(String),

    /// Run of opaque JSON items, one position each
    Items(Vec<Value>),

    /// Single-position marker (e.g. a paragraph boundary); never split
    Marker,
}

impl Payload {
    /// Number of sequence positions the payload occupies
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.graphemes(true).count(),
            Payload::Items(items) => items.len(),
            Payload::Marker => 1,
        }
    }

    /// Check if the payload occupies no positions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split off the content from `offset` onwards
    fn split_off(&mut self, offset: usize) -> Payload {
        match self {
            Payload::Text(text) => {
                let byte = text
                    .grapheme_indices(true)
                    .nth(offset)
                    .map(|(i, _)| i)
                    .unwrap_or(text.len());
                Payload::Text(text.split_off(byte))
            }
            Payload::Items(items) => Payload::Items(items.split_off(offset)),
            Payload::Marker => unreachable!("markers occupy one position and are never split"),
        }
    }

    /// Whether `other` can be appended to this payload
    fn can_append(&self, other: &Payload) -> bool {
        matches!(
            (self, other),
            (Payload::Text(_), Payload::Text(_)) | (Payload::Items(_), Payload::Items(_))
        )
    }

    fn append(&mut self, other: Payload) {
        match (self, other) {
            (Payload::Text(text), Payload::Text(more)) => text.push_str(&more),
            (Payload::Items(items), Payload::Items(more)) => items.extend(more),
            _ => unreachable!("append requires matching payload kinds"),
        }
    }
}

/// Segment content as it travels in an insert op
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub payload: Payload,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: PropertySet,
}

impl SegmentSpec {
    /// Text content
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            props: PropertySet::new(),
        }
    }

    /// Item content
    pub fn items(items: Vec<Value>) -> Self {
        Self {
            payload: Payload::Items(items),
            props: PropertySet::new(),
        }
    }

    /// Marker content
    pub fn marker() -> Self {
        Self {
            payload: Payload::Marker,
            props: PropertySet::new(),
        }
    }

    /// Attach initial properties
    pub fn with_props(mut self, props: PropertySet) -> Self {
        self.props = props;
        self
    }

    /// Number of positions the content occupies
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the content occupies no positions
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A segment in the merge tree
#[derive(Debug, Clone)]
pub struct Segment {
    payload: Payload,

    /// Cached `payload.len()`
    length: usize,

    pub(crate) insert: InsertStamp,

    pub(crate) removal: Option<RemoveStamp>,

    pub(crate) properties: Properties,

    /// Leaf block holding this segment
    pub(crate) parent: Key,

    /// Local seqs of pending edits that reference this segment
    pub(crate) groups: SmallVec<[LocalSeq; 2]>,
}

impl Segment {
    pub(crate) fn new(spec: SegmentSpec, insert: InsertStamp, parent: Key) -> Self {
        let length = spec.payload.len();
        Self {
            payload: spec.payload,
            length,
            insert,
            removal: None,
            properties: Properties::from_set(spec.props),
            parent,
            groups: SmallVec::new(),
        }
    }

    /// Number of positions the segment occupies when visible
    pub fn len(&self) -> usize {
        self.length
    }

    /// Check if the segment has no content
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Current property values
    pub fn properties(&self) -> &PropertySet {
        self.properties.values()
    }

    pub fn insert_stamp(&self) -> &InsertStamp {
        &self.insert
    }

    pub fn removal(&self) -> Option<&RemoveStamp> {
        self.removal.as_ref()
    }

    /// Whether the segment is tombstoned (by anyone, pending or sequenced)
    pub fn is_removed(&self) -> bool {
        self.removal.is_some()
    }

    /// Whether this replica still waits for an ack touching the segment
    pub fn is_pending(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Positions the segment contributes under a perspective: all or nothing
    pub fn visible_len(&self, perspective: &Perspective) -> usize {
        let inserted = perspective.sees_insert(&self.insert);
        let removed = self
            .removal
            .as_ref()
            .is_some_and(|removal| perspective.sees_removal(removal));
        if inserted && !removed {
            self.length
        } else {
            0
        }
    }

    /// Split at `offset`, keeping the head and returning the tail
    pub(crate) fn split_at(&mut self, offset: usize) -> Segment {
        debug_assert!(offset > 0 && offset < self.length);
        let tail_payload = self.payload.split_off(offset);
        let tail_len = self.length - offset;
        self.length = offset;
        Segment {
            payload: tail_payload,
            length: tail_len,
            insert: self.insert,
            removal: self.removal.clone(),
            properties: self.properties.clone(),
            parent: self.parent,
            groups: self.groups.clone(),
        }
    }

    /// Whether `next` (the right neighbour) can be folded into this segment
    ///
    /// Both must be acknowledged below the window, live, free of pending
    /// edits and carry identical properties.
    pub(crate) fn can_coalesce(&self, next: &Segment, min_seq: SeqNum) -> bool {
        self.insert.seq <= min_seq
            && next.insert.seq <= min_seq
            && self.removal.is_none()
            && next.removal.is_none()
            && self.groups.is_empty()
            && next.groups.is_empty()
            && !self.properties.has_pending()
            && !next.properties.has_pending()
            && self.properties.values() == next.properties.values()
            && self.payload.can_append(&next.payload)
    }

    /// Fold the right neighbour into this segment
    pub(crate) fn coalesce(&mut self, next: Segment) {
        self.length += next.length;
        self.insert.seq = self.insert.seq.max(next.insert.seq);
        self.payload.append(next.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergetree::stamp::ClientIdx;
    use serde_json::json;

    fn parent() -> Key {
        let mut arena = super::super::arena::Arena::new();
        arena.insert(())
    }

    #[test]
    fn test_grapheme_length() {
        assert_eq!(Payload::Text("Hello 👋".to_string()).len(), 7);
        assert_eq!(Payload::Text("👨‍👩‍👧‍👦".to_string()).len(), 1);
        assert_eq!(Payload::Items(vec![json!(1), json!(2)]).len(), 2);
        assert_eq!(Payload::Marker.len(), 1);
    }

    #[test]
    fn test_split_text_on_grapheme_boundary() {
        let spec = SegmentSpec::text("a👋b");
        let mut seg = Segment::new(spec, InsertStamp::sequenced(1, ClientIdx(0)), parent());

        let tail = seg.split_at(2);

        assert_eq!(seg.payload(), &Payload::Text("a👋".to_string()));
        assert_eq!(tail.payload(), &Payload::Text("b".to_string()));
        assert_eq!(seg.len(), 2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.insert, seg.insert);
    }

    #[test]
    fn test_visibility_by_perspective() {
        let mut seg = Segment::new(
            SegmentSpec::text("abc"),
            InsertStamp::sequenced(3, ClientIdx(1)),
            parent(),
        );
        assert_eq!(seg.visible_len(&Perspective::at(2)), 0);
        assert_eq!(seg.visible_len(&Perspective::at(3)), 3);

        seg.removal = Some(RemoveStamp::sequenced(5, ClientIdx(2)));
        assert_eq!(seg.visible_len(&Perspective::at(4)), 3);
        assert_eq!(seg.visible_len(&Perspective::at(5)), 0);
        assert_eq!(seg.visible_len(&Perspective::Local), 0);
    }

    #[test]
    fn test_coalesce() {
        let stamp = InsertStamp::sequenced(1, ClientIdx(0));
        let mut left = Segment::new(SegmentSpec::text("ab"), stamp, parent());
        let right = Segment::new(
            SegmentSpec::text("cd"),
            InsertStamp::sequenced(2, ClientIdx(1)),
            parent(),
        );

        assert!(!left.can_coalesce(&right, 1));
        assert!(left.can_coalesce(&right, 2));

        left.coalesce(right);
        assert_eq!(left.payload(), &Payload::Text("abcd".to_string()));
        assert_eq!(left.len(), 4);
    }

    #[test]
    fn test_spec_serialization() {
        let spec = SegmentSpec::items(vec![json!({"id": 1})]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: SegmentSpec = serde_json::from_str(&json).unwrap();

        assert_eq!(spec, back);
        assert!(!json.contains("props"));
    }
}
