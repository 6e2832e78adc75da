//! Merge tree: a B-tree of segments with per-block length caches
//!
//! Segments live in leaf blocks at uniform depth; interior blocks hold child
//! blocks. Every block lazily caches its local length and its partial
//! lengths, so resolving a position under any perspective inside the
//! collaboration window descends the tree without scanning segments.
//!
//! An empty cache cell marks a block dirty. Mutations clear the cell on the
//! touched block and every ancestor; the next query rebuilds bottom-up.
//!
//! # Concurrent inserts
//!
//! An insert resolves its position by walking children left to right. Once
//! the position is exhausted it may still pass over segments that are
//! invisible from the inserter's perspective; it stops before the first one
//! whose insertion stamp orders before its own (see
//! [`inserts_before`](super::stamp::inserts_before)).

use super::arena::{Arena, Key};
use super::partial_lengths::{PartialLengths, PartialLengthsBuilder};
use super::pending::{EditKind, PendingEdit, PendingLog};
use super::perspective::Perspective;
use super::properties::{LastWriterWins, PriorValues, PropertyMerge, PropertySet};
use super::segment::{Payload, Segment, SegmentRef, SegmentSpec};
use super::stamp::{inserts_before, ClientIdx, InsertStamp, OpStamp, RemoveStamp, SeqNum, UNIVERSAL_SEQ};
use crate::error::{MergeError, Result};
use crate::options::MergeTreeOptions;
use serde_json::Value;
use std::cell::OnceCell;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Child {
    Block(Key),
    Segment(Key),
}

#[derive(Debug)]
pub(super) struct BlockLengths {
    pub local: usize,
    pub partial: PartialLengths,
}

#[derive(Debug)]
pub(super) struct Block {
    pub parent: Option<Key>,
    pub children: Vec<Child>,

    /// Empty while dirty
    pub lengths: OnceCell<BlockLengths>,
}

impl Block {
    pub fn new(parent: Option<Key>, children: Vec<Child>) -> Self {
        Self {
            parent,
            children,
            lengths: OnceCell::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        !self.children.iter().any(|c| matches!(c, Child::Block(_)))
    }
}

/// Where an insert walk ended
enum Landing {
    Before(Key),
    Inside(Key, usize),
}

/// Annotated segments with the values they held before a local annotate
pub(crate) type AnnotateOutcome = (Vec<SegmentRef>, HashMap<SegmentRef, PriorValues>);

/// Segment tree holding the whole sequence
#[derive(Debug)]
pub struct MergeTree {
    pub(super) segments: Arena<Segment>,
    pub(super) blocks: Arena<Block>,
    pub(super) root: Key,
    pub(super) options: MergeTreeOptions,
    merger: Box<dyn PropertyMerge>,
    pub(crate) pending: PendingLog,

    /// Window min seq; partial lengths fold history at or below it
    pub(super) floor: SeqNum,
}

impl MergeTree {
    /// Create an empty tree
    pub fn new(options: MergeTreeOptions) -> Result<Self> {
        options.validate()?;
        let mut blocks = Arena::new();
        let root = blocks.insert(Block::new(None, Vec::new()));
        Ok(Self {
            segments: Arena::new(),
            blocks,
            root,
            options,
            merger: Box::new(LastWriterWins),
            pending: PendingLog::new(),
            floor: UNIVERSAL_SEQ,
        })
    }

    /// Replace the per-key annotate merge rule
    pub fn with_merger(mut self, merger: Box<dyn PropertyMerge>) -> Self {
        self.merger = merger;
        self
    }

    pub fn options(&self) -> &MergeTreeOptions {
        &self.options
    }

    /// Min seq the tree was last compacted against
    pub fn min_seq(&self) -> SeqNum {
        self.floor
    }

    /// Number of segments held, tombstones included
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Local edits waiting for acknowledgement
    pub fn pending(&self) -> &PendingLog {
        &self.pending
    }

    // ---- queries -------------------------------------------------------

    /// Visible length under a perspective
    pub fn length_at(&self, perspective: &Perspective) -> usize {
        self.block_len(self.root, perspective)
    }

    /// Resolve a segment handle
    pub fn segment(&self, segment: SegmentRef) -> Result<&Segment> {
        self.segments
            .get(segment.0)
            .ok_or_else(|| MergeError::StaleReference(segment.to_string()))
    }

    /// Position of a segment's first element under a perspective
    ///
    /// Segments invisible from the perspective report the position they
    /// would occupy.
    pub fn position_of(&self, segment: SegmentRef, perspective: &Perspective) -> Result<usize> {
        self.segment(segment)?;
        Ok(self.offset_of(segment.0, perspective))
    }

    /// Visible segment containing `pos`, with the offset inside it
    pub fn segment_at(&self, pos: usize, perspective: &Perspective) -> Option<(SegmentRef, usize)> {
        self.find_segment(pos, perspective)
            .map(|(key, offset)| (SegmentRef(key), offset))
    }

    /// Visible segments overlapping `[start, end)`, in order
    pub fn walk_range(
        &self,
        start: usize,
        end: usize,
        perspective: &Perspective,
    ) -> Result<Vec<SegmentRef>> {
        self.check_range(start, end, perspective)?;
        Ok(self
            .collect_range(start, end, perspective)
            .into_iter()
            .map(SegmentRef)
            .collect())
    }

    /// Every segment in document order, tombstones included
    pub fn segments(&self) -> Vec<SegmentRef> {
        let mut out = Vec::with_capacity(self.segments.len());
        self.visit(self.root, &mut |key, _| out.push(SegmentRef(key)));
        out
    }

    /// Visible text under a perspective; non-text payloads are skipped
    pub fn text(&self, perspective: &Perspective) -> String {
        let mut text = String::new();
        self.visit(self.root, &mut |_, segment| {
            if segment.visible_len(perspective) > 0 {
                if let Payload::Text(chunk) = segment.payload() {
                    text.push_str(chunk);
                }
            }
        });
        text
    }

    /// Visible items under a perspective; non-item payloads are skipped
    pub fn items(&self, perspective: &Perspective) -> Vec<Value> {
        let mut items = Vec::new();
        self.visit(self.root, &mut |_, segment| {
            if segment.visible_len(perspective) > 0 {
                if let Payload::Items(values) = segment.payload() {
                    items.extend(values.iter().cloned());
                }
            }
        });
        items
    }

    /// Properties of the element at `pos`
    pub fn properties_at(&self, pos: usize, perspective: &Perspective) -> Option<&PropertySet> {
        let (key, _) = self.find_segment(pos, perspective)?;
        Some(self.segments[key].properties())
    }

    /// Translate a position between perspectives
    ///
    /// The element at `pos` under `from` keeps its identity; if it is not
    /// visible under `to`, the result is the position it would occupy there.
    /// The end position maps to the end.
    pub fn translate(&self, pos: usize, from: &Perspective, to: &Perspective) -> Result<usize> {
        let length = self.length_at(from);
        if pos > length {
            return Err(MergeError::InvalidPosition {
                position: pos,
                length,
            });
        }
        match self.find_segment(pos, from) {
            None => Ok(self.length_at(to)),
            Some((key, offset)) => {
                let start = self.offset_of(key, to);
                if self.segments[key].visible_len(to) > 0 {
                    Ok(start + offset)
                } else {
                    Ok(start)
                }
            }
        }
    }

    /// Path of child indices from the root; orders segments by document position
    pub(crate) fn document_order(&self, segment: SegmentRef) -> Vec<usize> {
        let mut path = Vec::new();
        let mut child = Child::Segment(segment.0);
        let mut parent = self.segments.get(segment.0).map(|s| s.parent);
        while let Some(block) = parent {
            path.push(self.child_index(block, child));
            child = Child::Block(block);
            parent = self.blocks[block].parent;
        }
        path.reverse();
        path
    }

    // ---- edits ---------------------------------------------------------

    /// Insert a segment at `pos` as seen from `perspective`
    pub(crate) fn insert(
        &mut self,
        pos: usize,
        spec: SegmentSpec,
        perspective: &Perspective,
        stamp: OpStamp,
    ) -> Result<SegmentRef> {
        if spec.is_empty() {
            return Err(MergeError::EmptySegment);
        }
        let length = self.length_at(perspective);
        if pos > length {
            return Err(MergeError::InvalidPosition {
                position: pos,
                length,
            });
        }

        let insert = stamp.insert_stamp();
        let mut remaining = pos;
        let landing = self.insert_walk(self.root, &mut remaining, perspective, &|existing| {
            inserts_before(&insert, existing)
        });
        let (leaf, index) = self.landing_slot(landing);

        let key = self.segments.insert(Segment::new(spec, insert, leaf));
        self.track(key, stamp);
        self.blocks[leaf].children.insert(index, Child::Segment(key));
        self.invalidate(leaf);
        self.split_if_needed(leaf);
        Ok(SegmentRef(key))
    }

    /// Tombstone every segment visible in `[start, end)`
    pub(crate) fn mark_range_removed(
        &mut self,
        start: usize,
        end: usize,
        perspective: &Perspective,
        stamp: OpStamp,
    ) -> Result<Vec<SegmentRef>> {
        self.check_range(start, end, perspective)?;
        if start == end {
            return Ok(Vec::new());
        }
        self.ensure_boundary(start, perspective);
        self.ensure_boundary(end, perspective);

        let targets = self.collect_range(start, end, perspective);
        for &key in &targets {
            let segment = &mut self.segments[key];
            match segment.removal.as_mut() {
                None => segment.removal = Some(stamp.remove_stamp()),
                Some(removal) => match stamp {
                    OpStamp::Remote { seq, client } => removal.overlap(seq, client),
                    OpStamp::Local { .. } => {
                        debug_assert!(false, "local view cannot see a removed segment");
                    }
                },
            }
            self.track(key, stamp);
            let leaf = self.segments[key].parent;
            self.invalidate(leaf);
        }
        Ok(targets.into_iter().map(SegmentRef).collect())
    }

    /// Merge `props` into every segment visible in `[start, end)`
    pub(crate) fn annotate_range(
        &mut self,
        start: usize,
        end: usize,
        props: &PropertySet,
        perspective: &Perspective,
        stamp: OpStamp,
    ) -> Result<AnnotateOutcome> {
        self.check_range(start, end, perspective)?;
        if start == end {
            return Ok((Vec::new(), HashMap::new()));
        }
        self.ensure_boundary(start, perspective);
        self.ensure_boundary(end, perspective);

        let targets = self.collect_range(start, end, perspective);
        let mut priors = HashMap::new();
        for &key in &targets {
            let merger = &*self.merger;
            let properties = &mut self.segments[key].properties;
            if stamp.is_local() {
                priors.insert(SegmentRef(key), properties.apply_local(props, merger));
            } else {
                properties.apply_remote(props, merger);
            }
            self.track(key, stamp);
        }
        Ok((targets.into_iter().map(SegmentRef).collect(), priors))
    }

    /// Append a segment at the end of the sequence with explicit stamps
    pub(crate) fn push_loaded(
        &mut self,
        spec: SegmentSpec,
        insert: InsertStamp,
        removal: Option<RemoveStamp>,
    ) -> SegmentRef {
        let leaf = self.last_leaf();
        let mut segment = Segment::new(spec, insert, leaf);
        segment.removal = removal;
        let key = self.segments.insert(segment);
        self.blocks[leaf].children.push(Child::Segment(key));
        self.invalidate(leaf);
        self.split_if_needed(leaf);
        SegmentRef(key)
    }

    /// Stamp a pending edit's segments with the sequence number it received
    pub(crate) fn ack_edit(&mut self, edit: &PendingEdit, seq: SeqNum) {
        for &segment in &edit.segments {
            let merger = &*self.merger;
            let Some(seg) = self.segments.get_mut(segment.0) else {
                continue;
            };
            seg.groups.retain(|local_seq| *local_seq != edit.local_seq);
            match &edit.kind {
                EditKind::Insert => {
                    seg.insert.seq = seq;
                    seg.insert.local_seq = None;
                }
                EditKind::Remove => {
                    if let Some(removal) = seg.removal.as_mut() {
                        if removal.is_pending() {
                            removal.seq = seq;
                        }
                        removal.local_seq = None;
                    }
                }
                EditKind::Annotate { props, .. } => seg.properties.ack(props, merger),
            }
            let leaf = seg.parent;
            self.invalidate(leaf);
        }
    }

    /// Move a pending insert to the slot it gets when resubmitted now
    ///
    /// Replicas apply a resubmitted insert against the current sequenced
    /// state, so it lands in front of any tombstone left at its position by
    /// removals sequenced since it was made. The edit's segments move as one
    /// run, together with later pending inserts made inside it.
    pub(crate) fn resettle_insert(&mut self, edit: &PendingEdit) {
        let order = self.segments();
        let Some(first) = order.iter().position(|s| edit.segments.contains(s)) else {
            return;
        };
        let Some(last) = order.iter().rposition(|s| edit.segments.contains(s)) else {
            return;
        };
        let run: Vec<Key> = order[first..=last].iter().map(|s| s.0).collect();

        let local_seq = edit.local_seq;
        let view = Perspective::LocalBefore(local_seq);
        let pos = self.offset_of(run[0], &view);
        for &key in &run {
            self.detach(key);
        }

        let stripped = |stamp: &InsertStamp| {
            stamp.is_pending() && stamp.local_seq.is_some_and(|seq| seq >= local_seq)
        };
        let mut remaining = pos;
        let landing = self.insert_walk(self.root, &mut remaining, &view, &|existing| {
            !stripped(existing)
        });
        let (mut leaf, mut index) = self.landing_slot(landing);
        for key in run {
            self.segments[key].parent = leaf;
            self.blocks[leaf].children.insert(index, Child::Segment(key));
            self.invalidate(leaf);
            self.split_if_needed(leaf);
            leaf = self.segments[key].parent;
            index = self.child_index(leaf, Child::Segment(key)) + 1;
        }
        trace!(local_seq, pos, "resettled pending insert");
    }

    /// Undo an unsubmitted local edit
    pub(crate) fn rollback_edit(&mut self, edit: &PendingEdit, local: ClientIdx) {
        for &segment in &edit.segments {
            if !self.segments.contains(segment.0) {
                continue;
            }
            if let EditKind::Insert = edit.kind {
                self.discard_segment(segment.0);
                continue;
            }

            let seg = &mut self.segments[segment.0];
            seg.groups.retain(|local_seq| *local_seq != edit.local_seq);
            match &edit.kind {
                EditKind::Remove => {
                    let pending_only = seg.removal.as_ref().is_some_and(|r| r.is_pending());
                    if pending_only {
                        seg.removal = None;
                    } else if let Some(removal) = seg.removal.as_mut() {
                        removal.clients.retain(|client| *client != local);
                        removal.local_seq = None;
                    }
                }
                EditKind::Annotate { props, priors } => {
                    let prior = priors.get(&segment).cloned().unwrap_or_default();
                    seg.properties.rollback(props, &prior);
                }
                EditKind::Insert => {}
            }
            let leaf = seg.parent;
            self.invalidate(leaf);
        }
    }

    // ---- structure -----------------------------------------------------

    fn track(&mut self, key: Key, stamp: OpStamp) {
        if let OpStamp::Local { local_seq, .. } = stamp {
            let groups = &mut self.segments[key].groups;
            if !groups.contains(&local_seq) {
                groups.push(local_seq);
            }
        }
    }

    fn check_range(&self, start: usize, end: usize, perspective: &Perspective) -> Result<usize> {
        let length = self.length_at(perspective);
        if start > end || end > length {
            return Err(MergeError::InvalidRange { start, end, length });
        }
        Ok(length)
    }

    pub(super) fn child_len(&self, child: Child, perspective: &Perspective) -> usize {
        match child {
            Child::Segment(key) => self.segments[key].visible_len(perspective),
            Child::Block(key) => self.block_len(key, perspective),
        }
    }

    fn block_len(&self, block: Key, perspective: &Perspective) -> usize {
        let lengths = self.lengths(block);
        match *perspective {
            Perspective::Local => lengths.local,
            Perspective::Remote { ref_seq, client } => lengths
                .partial
                .len(ref_seq, client)
                .unwrap_or_else(|| self.sum_children(block, perspective)),
            Perspective::LocalBefore(_) => self.sum_children(block, perspective),
        }
    }

    fn sum_children(&self, block: Key, perspective: &Perspective) -> usize {
        self.blocks[block]
            .children
            .iter()
            .map(|&child| self.child_len(child, perspective))
            .sum()
    }

    fn lengths(&self, block: Key) -> &BlockLengths {
        self.blocks[block]
            .lengths
            .get_or_init(|| self.compute_lengths(block))
    }

    fn compute_lengths(&self, block: Key) -> BlockLengths {
        let mut local = 0;
        let mut builder = PartialLengthsBuilder::new(self.floor);
        for &child in &self.blocks[block].children {
            match child {
                Child::Segment(key) => {
                    let segment = &self.segments[key];
                    local += segment.visible_len(&Perspective::Local);
                    builder.add_segment(segment);
                }
                Child::Block(key) => {
                    let lengths = self.lengths(key);
                    local += lengths.local;
                    builder.add_child(&lengths.partial);
                }
            }
        }
        BlockLengths {
            local,
            partial: builder.finish(),
        }
    }

    /// Mark a block and its ancestors dirty
    pub(super) fn invalidate(&mut self, block: Key) {
        let mut current = Some(block);
        while let Some(key) = current {
            let block = &mut self.blocks[key];
            block.lengths.take();
            current = block.parent;
        }
    }

    pub(super) fn child_index(&self, parent: Key, child: Child) -> usize {
        self.blocks[parent]
            .children
            .iter()
            .position(|c| *c == child)
            .expect("child is linked to its parent")
    }

    fn offset_of(&self, key: Key, perspective: &Perspective) -> usize {
        let mut pos = 0;
        let mut child = Child::Segment(key);
        let mut parent = Some(self.segments[key].parent);
        while let Some(block) = parent {
            for &sibling in &self.blocks[block].children {
                if sibling == child {
                    break;
                }
                pos += self.child_len(sibling, perspective);
            }
            child = Child::Block(block);
            parent = self.blocks[block].parent;
        }
        pos
    }

    fn find_segment(&self, pos: usize, perspective: &Perspective) -> Option<(Key, usize)> {
        let mut block = self.root;
        let mut remaining = pos;
        'descend: loop {
            for &child in &self.blocks[block].children {
                let len = self.child_len(child, perspective);
                if remaining < len {
                    match child {
                        Child::Segment(key) => return Some((key, remaining)),
                        Child::Block(key) => {
                            block = key;
                            continue 'descend;
                        }
                    }
                }
                remaining -= len;
            }
            return None;
        }
    }

    /// Find where an insert at `remaining` lands
    ///
    /// `goes_before` decides, once the position is exhausted, whether the
    /// insert stops in front of a segment invisible from `perspective`.
    fn insert_walk<F: Fn(&InsertStamp) -> bool>(
        &self,
        block: Key,
        remaining: &mut usize,
        perspective: &Perspective,
        goes_before: &F,
    ) -> Option<Landing> {
        for &child in &self.blocks[block].children {
            let len = self.child_len(child, perspective);
            match child {
                Child::Segment(key) => {
                    if *remaining < len {
                        return Some(if *remaining == 0 {
                            Landing::Before(key)
                        } else {
                            Landing::Inside(key, *remaining)
                        });
                    }
                    if *remaining == 0 && len == 0 && goes_before(&self.segments[key].insert) {
                        return Some(Landing::Before(key));
                    }
                }
                Child::Block(key) => {
                    if *remaining <= len {
                        let mut inner = *remaining;
                        if let Some(landing) = self.insert_walk(key, &mut inner, perspective, goes_before) {
                            return Some(landing);
                        }
                    }
                }
            }
            *remaining -= len;
        }
        None
    }

    /// Leaf and child index a landing resolves to, splitting if it is inside a segment
    fn landing_slot(&mut self, landing: Option<Landing>) -> (Key, usize) {
        match landing {
            Some(Landing::Before(key)) => {
                let leaf = self.segments[key].parent;
                (leaf, self.child_index(leaf, Child::Segment(key)))
            }
            Some(Landing::Inside(key, offset)) => {
                let tail = self.split_segment(key, offset);
                let leaf = self.segments[tail].parent;
                (leaf, self.child_index(leaf, Child::Segment(tail)))
            }
            None => {
                let leaf = self.last_leaf();
                (leaf, self.blocks[leaf].children.len())
            }
        }
    }

    /// Split the visible segment containing `pos` so a segment starts there
    fn ensure_boundary(&mut self, pos: usize, perspective: &Perspective) {
        if let Some((key, offset)) = self.find_segment(pos, perspective) {
            if offset > 0 {
                self.split_segment(key, offset);
            }
        }
    }

    /// Split a segment at `offset`; returns the tail
    fn split_segment(&mut self, key: Key, offset: usize) -> Key {
        let tail = self.segments[key].split_at(offset);
        let leaf = tail.parent;
        let groups = tail.groups.clone();
        let tail_key = self.segments.insert(tail);

        let index = self.child_index(leaf, Child::Segment(key));
        self.blocks[leaf]
            .children
            .insert(index + 1, Child::Segment(tail_key));
        for local_seq in groups {
            self.pending
                .record_split(local_seq, SegmentRef(key), SegmentRef(tail_key));
        }
        self.invalidate(leaf);
        self.split_if_needed(leaf);
        tail_key
    }

    fn collect_range(&self, start: usize, end: usize, perspective: &Perspective) -> Vec<Key> {
        let mut out = Vec::new();
        let mut offset = 0;
        self.collect_visible(self.root, start, end, &mut offset, perspective, &mut out);
        out
    }

    fn collect_visible(
        &self,
        block: Key,
        start: usize,
        end: usize,
        offset: &mut usize,
        perspective: &Perspective,
        out: &mut Vec<Key>,
    ) {
        for &child in &self.blocks[block].children {
            if *offset >= end {
                return;
            }
            let len = self.child_len(child, perspective);
            if len == 0 {
                continue;
            }
            if *offset + len > start {
                match child {
                    Child::Segment(key) => out.push(key),
                    Child::Block(key) => {
                        let mut inner = *offset;
                        self.collect_visible(key, start, end, &mut inner, perspective, out);
                    }
                }
            }
            *offset += len;
        }
    }

    pub(super) fn visit<F: FnMut(Key, &Segment)>(&self, block: Key, f: &mut F) {
        for &child in &self.blocks[block].children {
            match child {
                Child::Segment(key) => f(key, &self.segments[key]),
                Child::Block(key) => self.visit(key, f),
            }
        }
    }

    pub(super) fn last_leaf(&self) -> Key {
        let mut block = self.root;
        while let Some(&Child::Block(key)) = self.blocks[block].children.last() {
            block = key;
        }
        block
    }

    /// Leaf blocks in document order
    pub(super) fn leaves(&self) -> Vec<Key> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(block) = stack.pop() {
            let node = &self.blocks[block];
            if node.is_leaf() {
                leaves.push(block);
            } else {
                for &child in node.children.iter().rev() {
                    if let Child::Block(key) = child {
                        stack.push(key);
                    }
                }
            }
        }
        leaves
    }

    /// Point every child of `block` back at it
    pub(super) fn adopt(&mut self, block: Key) {
        let children = std::mem::take(&mut self.blocks[block].children);
        for &child in &children {
            match child {
                Child::Segment(key) => self.segments[key].parent = block,
                Child::Block(key) => self.blocks[key].parent = Some(block),
            }
        }
        self.blocks[block].children = children;
    }

    fn split_if_needed(&mut self, mut block: Key) {
        loop {
            let count = self.blocks[block].children.len();
            if count <= self.options.max_children {
                return;
            }
            let moved = self.blocks[block].children.split_off(count / 2);
            let parent = self.blocks[block].parent;
            let sibling = self.blocks.insert(Block::new(parent, moved));
            self.adopt(sibling);
            self.invalidate(block);
            trace!(block = %block, sibling = %sibling, "split block");

            match parent {
                Some(parent) => {
                    let index = self.child_index(parent, Child::Block(block));
                    self.blocks[parent]
                        .children
                        .insert(index + 1, Child::Block(sibling));
                    block = parent;
                }
                None => {
                    let root = self
                        .blocks
                        .insert(Block::new(None, vec![Child::Block(block), Child::Block(sibling)]));
                    self.blocks[block].parent = Some(root);
                    self.blocks[sibling].parent = Some(root);
                    self.root = root;
                    return;
                }
            }
        }
    }

    /// Unlink a segment from its leaf, keeping it in the arena
    fn detach(&mut self, key: Key) {
        let leaf = self.segments[key].parent;
        let index = self.child_index(leaf, Child::Segment(key));
        self.blocks[leaf].children.remove(index);
        self.invalidate(leaf);
        self.rebalance(leaf);
        self.collapse_root();
    }

    fn discard_segment(&mut self, key: Key) {
        if !self.segments.contains(key) {
            return;
        }
        self.detach(key);
        self.segments.remove(key);
    }
}
