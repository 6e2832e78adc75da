//! Zamboni: compaction behind the collaboration window
//!
//! Once the window's min seq passes a removal, no in-flight op can refer to
//! the removed content and the tombstone can go. Once it passes two adjacent
//! inserts, no op can tell them apart and they can be stored as one segment.
//! Both shrink leaves, so compaction finishes by repacking underfull blocks.

use super::arena::Key;
use super::perspective::Perspective;
use super::segment::Segment;
use super::stamp::SeqNum;
use super::tree::{Child, MergeTree};
use tracing::debug;

/// What a compaction pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub evicted: usize,
    pub coalesced: usize,
    pub blocks_removed: usize,
}

fn evictable(segment: &Segment, min_seq: SeqNum) -> bool {
    segment.groups.is_empty()
        && segment
            .removal
            .as_ref()
            .is_some_and(|removal| removal.local_seq.is_none() && removal.seq < min_seq)
}

impl MergeTree {
    /// Raise the window floor; never lowers it
    pub(crate) fn set_min_seq(&mut self, min_seq: SeqNum) {
        // Caches built under a lower floor stay valid and fold on their next rebuild
        self.floor = self.floor.max(min_seq);
    }

    /// Evict, coalesce and repack against the current min seq
    pub fn compact(&mut self) -> CompactionStats {
        let min_seq = self.floor;
        let blocks_before = self.blocks.len();
        let mut stats = CompactionStats::default();

        for leaf in self.leaves() {
            let children = std::mem::take(&mut self.blocks[leaf].children);
            let mut kept: Vec<Child> = Vec::with_capacity(children.len());
            for child in children {
                let Child::Segment(key) = child else {
                    kept.push(child);
                    continue;
                };
                if evictable(&self.segments[key], min_seq) {
                    self.segments.remove(key);
                    stats.evicted += 1;
                    continue;
                }
                if self.options.merge_adjacent {
                    if let Some(&Child::Segment(prev)) = kept.last() {
                        if self.segments[prev].can_coalesce(&self.segments[key], min_seq) {
                            if let Some(next) = self.segments.remove(key) {
                                self.segments[prev].coalesce(next);
                                stats.coalesced += 1;
                                continue;
                            }
                        }
                    }
                }
                kept.push(child);
            }
            self.blocks[leaf].children = kept;
            self.invalidate(leaf);
        }

        for leaf in self.leaves() {
            self.rebalance(leaf);
        }
        self.collapse_root();

        stats.blocks_removed = blocks_before.saturating_sub(self.blocks.len());
        if stats != CompactionStats::default() {
            debug!(
                min_seq,
                evicted = stats.evicted,
                coalesced = stats.coalesced,
                blocks_removed = stats.blocks_removed,
                length = self.length_at(&Perspective::Local),
                "compacted merge tree"
            );
        }
        stats
    }

    /// Restore the minimum fill of `block` by merging with or borrowing from
    /// an adjacent sibling; recurses upwards as parents shrink
    pub(super) fn rebalance(&mut self, block: Key) {
        if !self.blocks.contains(block) {
            return;
        }
        let Some(parent) = self.blocks[block].parent else {
            return;
        };
        let count = self.blocks[block].children.len();
        if count >= self.options.min_children {
            return;
        }

        let index = self.child_index(parent, Child::Block(block));
        if count == 0 {
            self.blocks[parent].children.remove(index);
            self.blocks.remove(block);
            self.invalidate(parent);
            self.rebalance(parent);
            return;
        }

        let sibling_count = self.blocks[parent].children.len();
        let sibling_index = if index > 0 {
            index - 1
        } else if index + 1 < sibling_count {
            index + 1
        } else {
            // Only child: fix the parent first, then retry once it has siblings
            self.rebalance(parent);
            let has_siblings = self
                .blocks
                .get(block)
                .and_then(|b| b.parent)
                .is_some_and(|p| self.blocks[p].children.len() > 1);
            if has_siblings {
                self.rebalance(block);
            }
            return;
        };
        let Child::Block(sibling) = self.blocks[parent].children[sibling_index] else {
            return;
        };
        let (left, right) = if sibling_index < index {
            (sibling, block)
        } else {
            (block, sibling)
        };

        let total = self.blocks[left].children.len() + self.blocks[right].children.len();
        if total <= self.options.max_children {
            let moved = std::mem::take(&mut self.blocks[right].children);
            self.blocks[left].children.extend(moved);
            self.adopt(left);
            let right_index = self.child_index(parent, Child::Block(right));
            self.blocks[parent].children.remove(right_index);
            self.blocks.remove(right);
            self.invalidate(left);
            self.rebalance(parent);
        } else {
            let mut all = std::mem::take(&mut self.blocks[left].children);
            all.append(&mut self.blocks[right].children);
            let right_half = all.split_off(total / 2);
            self.blocks[left].children = all;
            self.blocks[right].children = right_half;
            self.adopt(left);
            self.adopt(right);
            self.invalidate(left);
            self.invalidate(right);
        }
    }

    /// Replace a root with a single child block by that child
    pub(super) fn collapse_root(&mut self) {
        loop {
            let &[Child::Block(only)] = self.blocks[self.root].children.as_slice() else {
                return;
            };
            let old = self.root;
            self.blocks[only].parent = None;
            self.root = only;
            self.blocks.remove(old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergetree::segment::SegmentSpec;
    use crate::mergetree::stamp::{ClientIdx, OpStamp};
    use crate::mergetree::tree::tests::check_invariants;
    use crate::options::MergeTreeOptions;

    const A: ClientIdx = ClientIdx(0);
    const B: ClientIdx = ClientIdx(1);

    fn tree() -> MergeTree {
        MergeTree::new(MergeTreeOptions {
            max_children: 4,
            ..MergeTreeOptions::default()
        })
        .unwrap()
    }

    fn append(tree: &mut MergeTree, text: &str, seq: SeqNum) {
        let len = tree.length_at(&Perspective::at(seq - 1));
        tree.insert(
            len,
            SegmentSpec::text(text),
            &Perspective::at(seq - 1),
            OpStamp::Remote { seq, client: A },
        )
        .unwrap();
    }

    #[test]
    fn test_evicts_only_below_min_seq() {
        let mut tree = tree();
        append(&mut tree, "abc", 1);
        append(&mut tree, "def", 2);
        tree.mark_range_removed(
            0,
            3,
            &Perspective::of_client(2, B),
            OpStamp::Remote { seq: 3, client: B },
        )
        .unwrap();

        tree.set_min_seq(3);
        let stats = tree.compact();
        assert_eq!(stats.evicted, 0);
        assert_eq!(tree.segment_count(), 2);

        tree.set_min_seq(4);
        let stats = tree.compact();
        assert_eq!(stats.evicted, 1);
        assert_eq!(tree.segment_count(), 1);
        assert_eq!(tree.text(&Perspective::Local), "def");
        check_invariants(&tree);
    }

    #[test]
    fn test_raising_floor_keeps_cached_lengths() {
        let mut tree = tree();
        for (i, word) in ["ab", "cd", "ef", "gh"].iter().enumerate() {
            append(&mut tree, word, i as SeqNum + 1);
        }
        let before: Vec<usize> = (2..=4)
            .map(|seq| tree.length_at(&Perspective::at(seq)))
            .collect();

        tree.set_min_seq(2);
        let after: Vec<usize> = (2..=4)
            .map(|seq| tree.length_at(&Perspective::at(seq)))
            .collect();
        assert_eq!(after, before);

        // A rebuild under the new floor mixes with blocks cached under the old one
        append(&mut tree, "ij", 5);
        assert_eq!(tree.length_at(&Perspective::at(2)), 4);
        assert_eq!(tree.length_at(&Perspective::at(4)), 8);
        assert_eq!(tree.length_at(&Perspective::at(5)), 10);
        check_invariants(&tree);
    }

    #[test]
    fn test_coalesces_adjacent_acked_segments() {
        let mut tree = tree();
        for (i, word) in ["ab", "cd", "ef"].iter().enumerate() {
            append(&mut tree, word, i as SeqNum + 1);
        }

        tree.set_min_seq(2);
        assert_eq!(tree.compact().coalesced, 1);
        assert_eq!(tree.segment_count(), 2);

        tree.set_min_seq(3);
        tree.compact();
        assert_eq!(tree.segment_count(), 1);
        assert_eq!(tree.text(&Perspective::Local), "abcdef");
        assert_eq!(tree.length_at(&Perspective::at(3)), 6);
    }

    #[test]
    fn test_no_coalesce_when_disabled() {
        let mut tree = MergeTree::new(MergeTreeOptions {
            merge_adjacent: false,
            ..MergeTreeOptions::default()
        })
        .unwrap();
        append(&mut tree, "ab", 1);
        append(&mut tree, "cd", 2);

        tree.set_min_seq(5);
        assert_eq!(tree.compact(), CompactionStats::default());
        assert_eq!(tree.segment_count(), 2);
    }

    #[test]
    fn test_repacks_after_mass_removal() {
        let mut tree = tree();
        for seq in 1..=64 {
            append(&mut tree, "x", seq);
        }
        let blocks_before = tree.blocks.len();
        tree.mark_range_removed(
            4,
            60,
            &Perspective::at(64),
            OpStamp::Remote { seq: 65, client: B },
        )
        .unwrap();

        tree.set_min_seq(66);
        let stats = tree.compact();

        assert_eq!(stats.evicted, 56);
        assert!(tree.blocks.len() < blocks_before);
        assert_eq!(tree.length_at(&Perspective::Local), 8);
        check_invariants(&tree);
        for leaf in tree.leaves() {
            if tree.blocks[leaf].parent.is_some() {
                assert!(tree.blocks[leaf].children.len() >= tree.options.min_children);
            }
        }
    }

    #[test]
    fn test_compacting_everything_leaves_empty_root() {
        let mut tree = tree();
        for seq in 1..=20 {
            append(&mut tree, "ab", seq);
        }
        tree.mark_range_removed(
            0,
            40,
            &Perspective::at(20),
            OpStamp::Remote { seq: 21, client: B },
        )
        .unwrap();
        tree.set_min_seq(22);
        tree.compact();

        assert_eq!(tree.segment_count(), 0);
        assert_eq!(tree.length_at(&Perspective::Local), 0);
        append(&mut tree, "z", 23);
        assert_eq!(tree.text(&Perspective::Local), "z");
        check_invariants(&tree);
    }
}
