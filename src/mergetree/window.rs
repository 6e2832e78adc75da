//! Collaboration window
//!
//! The span of sequence numbers in which concurrent edits can still be in
//! flight: `min_seq` is the lowest reference sequence number any connected
//! client may still send, `current_seq` the last op this replica applied.
//! History below `min_seq` is settled and can be compacted.

use super::stamp::{ClientIdx, LocalSeq, SeqNum, UNIVERSAL_SEQ};
use crate::error::{MergeError, Result};

/// Per-replica window state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaborationWindow {
    /// This replica's client index
    pub client: ClientIdx,

    pub min_seq: SeqNum,

    pub current_seq: SeqNum,

    /// Last local seq handed out
    local_seq: LocalSeq,
}

impl CollaborationWindow {
    pub fn new(client: ClientIdx) -> Self {
        Self {
            client,
            min_seq: UNIVERSAL_SEQ,
            current_seq: UNIVERSAL_SEQ,
            local_seq: 0,
        }
    }

    /// Window resumed from a snapshot
    pub fn resume(client: ClientIdx, min_seq: SeqNum, current_seq: SeqNum) -> Result<Self> {
        if min_seq > current_seq {
            return Err(MergeError::Serialization(format!(
                "min seq {} is ahead of current seq {}",
                min_seq, current_seq
            )));
        }
        Ok(Self {
            client,
            min_seq,
            current_seq,
            local_seq: 0,
        })
    }

    /// Hand out the next local seq
    pub fn next_local_seq(&mut self) -> LocalSeq {
        self.local_seq += 1;
        self.local_seq
    }

    /// Last local seq handed out (0 if none)
    pub fn local_seq(&self) -> LocalSeq {
        self.local_seq
    }

    /// Record an applied op; returns whether min seq moved
    pub fn advance(&mut self, seq: SeqNum, min_seq: SeqNum) -> Result<bool> {
        if seq <= self.current_seq {
            return Err(MergeError::protocol(
                seq,
                format!("sequence number not above current seq {}", self.current_seq),
            ));
        }
        if min_seq > seq {
            return Err(MergeError::protocol(
                seq,
                format!("minimum sequence number {} ahead of the op", min_seq),
            ));
        }
        self.current_seq = seq;
        if min_seq > self.min_seq {
            self.min_seq = min_seq;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_min_seq() {
        let mut window = CollaborationWindow::new(ClientIdx(0));

        assert_eq!(window.advance(1, 0), Ok(false));
        assert_eq!(window.advance(2, 1), Ok(true));
        assert_eq!(window.advance(3, 1), Ok(false));
        assert_eq!(window.current_seq, 3);
        assert_eq!(window.min_seq, 1);
    }

    #[test]
    fn test_min_seq_never_decreases() {
        let mut window = CollaborationWindow::new(ClientIdx(0));
        window.advance(5, 4).unwrap();

        assert_eq!(window.advance(6, 2), Ok(false));
        assert_eq!(window.min_seq, 4);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut window = CollaborationWindow::new(ClientIdx(0));
        window.advance(3, 0).unwrap();

        assert!(window.advance(3, 0).is_err());
        assert!(window.advance(4, 5).is_err());
        assert_eq!(window.current_seq, 3);
    }

    #[test]
    fn test_local_seq_counter() {
        let mut window = CollaborationWindow::new(ClientIdx(0));
        assert_eq!(window.local_seq(), 0);
        assert_eq!(window.next_local_seq(), 1);
        assert_eq!(window.next_local_seq(), 2);
    }

    #[test]
    fn test_resume_validates() {
        assert!(CollaborationWindow::resume(ClientIdx(0), 5, 3).is_err());
        let window = CollaborationWindow::resume(ClientIdx(0), 3, 5).unwrap();
        assert_eq!((window.min_seq, window.current_seq), (3, 5));
    }
}
