//! Partial lengths: per-block length as of any sequence number
//!
//! Answering "how long is this subtree as client `c` saw it at `ref_seq`"
//! by scanning segments would make every remote op linear in document size.
//! Instead each block caches its length history as events:
//!
//! - **Global deltas**: `+len` at a segment's insert seq, `-len` at its
//!   removal seq. Summing the deltas at or below `ref_seq` gives the pure
//!   sequenced length.
//! - **Client deltas**: a client always sees its own edits, even those
//!   sequenced after its `ref_seq`. The inserting client gets `+len` at the
//!   insert seq and every remover gets `-len` at the removal seq; summing a
//!   client's deltas strictly above `ref_seq` corrects the sequenced length
//!   to that client's view.
//!
//! Events at or below the fold floor (the window's min seq when the cache was
//! built) collapse into a base length, which keeps the cache proportional to
//! the collaboration window rather than to the document's history. Queries
//! below the floor return `None` and the caller falls back to a walk.

use super::segment::Segment;
use super::stamp::{ClientIdx, SeqNum};
use std::collections::HashMap;

/// Sorted deltas with precomputed running sums
#[derive(Debug, Clone, Default)]
struct DeltaRun {
    seqs: Vec<SeqNum>,
    sums: Vec<isize>,
}

impl DeltaRun {
    /// Build from unsorted deltas; `suffix` selects running sums from the right
    fn build(mut deltas: Vec<(SeqNum, isize)>, suffix: bool) -> Self {
        deltas.sort_unstable_by_key(|&(seq, _)| seq);

        let mut seqs: Vec<SeqNum> = Vec::with_capacity(deltas.len());
        let mut values: Vec<isize> = Vec::with_capacity(deltas.len());
        for (seq, delta) in deltas {
            match seqs.last() {
                Some(&last) if last == seq => {
                    if let Some(value) = values.last_mut() {
                        *value += delta;
                    }
                }
                _ => {
                    seqs.push(seq);
                    values.push(delta);
                }
            }
        }

        let mut sums = values;
        if suffix {
            for i in (0..sums.len().saturating_sub(1)).rev() {
                sums[i] += sums[i + 1];
            }
        } else {
            for i in 1..sums.len() {
                sums[i] += sums[i - 1];
            }
        }
        Self { seqs, sums }
    }

    /// Sum of deltas with seq `<= ref_seq` (prefix run)
    fn at_or_below(&self, ref_seq: SeqNum) -> isize {
        let idx = self.seqs.partition_point(|&seq| seq <= ref_seq);
        if idx == 0 {
            0
        } else {
            self.sums[idx - 1]
        }
    }

    /// Sum of deltas with seq `> ref_seq` (suffix run)
    fn above(&self, ref_seq: SeqNum) -> isize {
        let idx = self.seqs.partition_point(|&seq| seq <= ref_seq);
        self.sums.get(idx).copied().unwrap_or(0)
    }

    fn deltas(&self, suffix: bool) -> impl Iterator<Item = (SeqNum, isize)> + '_ {
        self.seqs.iter().enumerate().map(move |(i, &seq)| {
            let neighbour = if suffix {
                self.sums.get(i + 1).copied().unwrap_or(0)
            } else if i == 0 {
                0
            } else {
                self.sums[i - 1]
            };
            (seq, self.sums[i] - neighbour)
        })
    }
}

/// Length history of one block
#[derive(Debug, Clone, Default)]
pub(crate) struct PartialLengths {
    floor: SeqNum,
    base: isize,
    global: DeltaRun,
    clients: HashMap<ClientIdx, DeltaRun>,
}

impl PartialLengths {
    /// Length as seen by `client` (if any) at `ref_seq`
    pub fn len(&self, ref_seq: SeqNum, client: Option<ClientIdx>) -> Option<usize> {
        if ref_seq < self.floor {
            return None;
        }
        let mut total = self.base + self.global.at_or_below(ref_seq);
        if let Some(run) = client.and_then(|c| self.clients.get(&c)) {
            total += run.above(ref_seq);
        }
        debug_assert!(total >= 0, "negative partial length {}", total);
        Some(total.max(0) as usize)
    }

    /// Number of distinct sequence numbers tracked above the floor
    #[cfg(test)]
    pub fn tracked_seqs(&self) -> usize {
        self.global.seqs.len()
    }
}

/// Accumulates events from segments and child blocks
#[derive(Debug)]
pub(crate) struct PartialLengthsBuilder {
    floor: SeqNum,
    base: isize,
    global: Vec<(SeqNum, isize)>,
    clients: HashMap<ClientIdx, Vec<(SeqNum, isize)>>,
}

impl PartialLengthsBuilder {
    pub fn new(floor: SeqNum) -> Self {
        Self {
            floor,
            base: 0,
            global: Vec::new(),
            clients: HashMap::new(),
        }
    }

    fn push_global(&mut self, seq: SeqNum, delta: isize) {
        if seq <= self.floor {
            self.base += delta;
        } else {
            self.global.push((seq, delta));
        }
    }

    fn push_client(&mut self, client: ClientIdx, seq: SeqNum, delta: isize) {
        if seq > self.floor {
            self.clients.entry(client).or_default().push((seq, delta));
        }
    }

    pub fn add_segment(&mut self, segment: &Segment) {
        let len = segment.len() as isize;
        if len == 0 {
            return;
        }
        let insert = segment.insert;
        self.push_global(insert.seq, len);
        self.push_client(insert.client, insert.seq, len);

        if let Some(removal) = &segment.removal {
            self.push_global(removal.seq, -len);
            for &client in &removal.clients {
                self.push_client(client, removal.seq, -len);
            }
        }
    }

    /// Merge a child's history; children are never folded above the parent
    pub fn add_child(&mut self, child: &PartialLengths) {
        debug_assert!(child.floor <= self.floor);
        self.base += child.base;
        for (seq, delta) in child.global.deltas(false) {
            self.push_global(seq, delta);
        }
        for (&client, run) in &child.clients {
            for (seq, delta) in run.deltas(true) {
                self.push_client(client, seq, delta);
            }
        }
    }

    pub fn finish(self) -> PartialLengths {
        PartialLengths {
            floor: self.floor,
            base: self.base,
            global: DeltaRun::build(self.global, false),
            clients: self
                .clients
                .into_iter()
                .map(|(client, deltas)| (client, DeltaRun::build(deltas, true)))
                .filter(|(_, run)| !run.seqs.is_empty())
                .collect(),
        }
    }
}
