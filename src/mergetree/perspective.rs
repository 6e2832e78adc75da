//! Perspectives: named viewpoints for interpreting positions
//!
//! Local and remote views of the sequence diverge until edits are
//! acknowledged, so every position in the tree is relative to a perspective:
//!
//! - **Local**: everything this replica has applied, including its own
//!   pending edits. Local edits are expressed in this view.
//! - **Remote**: the view of a client that had seen exactly the ops up to
//!   `ref_seq`, plus its own edits. Inbound ops are expressed in this view.
//!   Without a client it is the pure sequenced state as of `ref_seq`.
//! - **LocalBefore**: the local view with this replica's pending edits at or
//!   after a given local seq stripped. Used to rebuild pending ops against
//!   the current sequenced state.

use super::stamp::{ClientIdx, InsertStamp, LocalSeq, RemoveStamp, SeqNum};

/// Viewpoint used to interpret positions and lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// Local view including pending edits
    Local,

    /// View of `client` (if any) as of `ref_seq`
    Remote {
        ref_seq: SeqNum,
        client: Option<ClientIdx>,
    },

    /// Local view excluding pending edits with local seq `>= local_seq`
    LocalBefore(LocalSeq),
}

impl Perspective {
    /// Pure sequenced state as of `seq`
    pub fn at(seq: SeqNum) -> Self {
        Self::Remote {
            ref_seq: seq,
            client: None,
        }
    }

    /// View of `client` when it had observed everything up to `ref_seq`
    pub fn of_client(ref_seq: SeqNum, client: ClientIdx) -> Self {
        Self::Remote {
            ref_seq,
            client: Some(client),
        }
    }

    /// Whether an insertion is visible from this perspective
    pub fn sees_insert(&self, stamp: &InsertStamp) -> bool {
        match *self {
            Self::Local => true,
            Self::Remote { ref_seq, client } => {
                stamp.seq <= ref_seq || client == Some(stamp.client)
            }
            Self::LocalBefore(before) => match stamp.local_seq {
                Some(local_seq) if stamp.is_pending() => local_seq < before,
                _ => true,
            },
        }
    }

    /// Whether a removal is visible from this perspective
    pub fn sees_removal(&self, stamp: &RemoveStamp) -> bool {
        match *self {
            Self::Local => true,
            Self::Remote { ref_seq, client } => {
                stamp.seq <= ref_seq || client.is_some_and(|c| stamp.removed_by(c))
            }
            Self::LocalBefore(before) => {
                !stamp.is_pending() || stamp.local_seq.is_some_and(|l| l < before)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: ClientIdx = ClientIdx(0);
    const OTHER: ClientIdx = ClientIdx(1);

    #[test]
    fn test_local_sees_everything() {
        let pending = InsertStamp::pending(LOCAL, 1);
        let removal = RemoveStamp::pending(LOCAL, 2);

        assert!(Perspective::Local.sees_insert(&pending));
        assert!(Perspective::Local.sees_removal(&removal));
    }

    #[test]
    fn test_remote_sees_only_its_history() {
        let insert = InsertStamp::sequenced(5, LOCAL);

        assert!(!Perspective::at(4).sees_insert(&insert));
        assert!(Perspective::at(5).sees_insert(&insert));
        assert!(!Perspective::of_client(4, OTHER).sees_insert(&insert));
        assert!(Perspective::of_client(4, LOCAL).sees_insert(&insert));
    }

    #[test]
    fn test_remote_never_sees_foreign_pending() {
        let pending = InsertStamp::pending(LOCAL, 1);
        let removal = RemoveStamp::pending(LOCAL, 1);

        assert!(!Perspective::of_client(1000, OTHER).sees_insert(&pending));
        assert!(!Perspective::of_client(1000, OTHER).sees_removal(&removal));
    }

    #[test]
    fn test_overlapping_remover_sees_own_removal() {
        let mut removal = RemoveStamp::sequenced(7, OTHER);
        removal.overlap(8, ClientIdx(2));

        assert!(Perspective::of_client(6, ClientIdx(2)).sees_removal(&removal));
        assert!(!Perspective::of_client(6, LOCAL).sees_removal(&removal));
    }

    #[test]
    fn test_local_before_strips_later_pending() {
        let early = InsertStamp::pending(LOCAL, 1);
        let late = InsertStamp::pending(LOCAL, 3);
        let acked = InsertStamp::sequenced(2, LOCAL);

        let view = Perspective::LocalBefore(3);
        assert!(view.sees_insert(&early));
        assert!(!view.sees_insert(&late));
        assert!(view.sees_insert(&acked));

        let mut overtaken = RemoveStamp::pending(LOCAL, 5);
        assert!(!view.sees_removal(&overtaken));
        overtaken.overlap(9, OTHER);
        assert!(view.sees_removal(&overtaken));
    }
}
